use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::InlineKeyboard,
    Result,
};

/// Outbound chat operations.
///
/// Telegram is the only implementation; the clash consumers depend on this
/// trait so they can be exercised with a recording fake.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef>;

    /// Replace text and keyboard of a sent message; `None` removes the keyboard.
    async fn edit_html(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()>;

    async fn delete_message(&self, msg: MessageRef) -> Result<()>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
