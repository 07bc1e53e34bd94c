//! Telegram adapter (teloxide).
//!
//! Implements the core [`MessagingPort`] over the Telegram Bot API and hosts the
//! `/coc` command surface: commands, button callbacks, and the consumer that
//! keeps a chat message in sync with a live clash.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
    RequestError,
};

use tokio::time::sleep;
use tracing::{debug, warn};

pub mod actions;
pub mod consumer;
pub mod handlers;
pub mod render;
pub mod router;

#[cfg(test)]
mod testing;

use cocbot_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ButtonAction, InlineKeyboard},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    fn markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
        let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .filter_map(|b| match &b.action {
                        ButtonAction::Callback(data) => {
                            Some(InlineKeyboardButton::callback(b.label.clone(), data.clone()))
                        }
                        ButtonAction::Url(raw) => match url::Url::parse(raw) {
                            Ok(u) => Some(InlineKeyboardButton::url(b.label.clone(), u)),
                            Err(e) => {
                                warn!(url = %raw, error = %e, "dropping button with invalid url");
                                None
                            }
                        },
                    })
                    .collect()
            })
            .filter(|row: &Vec<InlineKeyboardButton>| !row.is_empty())
            .collect();
        InlineKeyboardMarkup::new(rows)
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        debug!(wait_secs = d.as_secs(), "telegram asked us to back off");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.as_ref().map(Self::markup);
        let msg = self
            .with_retry(|| {
                let req = self
                    .bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true);
                match &markup {
                    Some(m) => req.reply_markup(m.clone()),
                    None => req,
                }
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_html(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        // An empty markup removes the keyboard.
        let markup = keyboard
            .as_ref()
            .map(Self::markup)
            .unwrap_or_else(|| InlineKeyboardMarkup::new(Vec::<Vec<InlineKeyboardButton>>::new()));

        let res = self
            .with_retry(|| {
                self.bot
                    .edit_message_text(
                        Self::tg_chat(msg.chat_id),
                        Self::tg_msg_id(msg.message_id),
                        html.to_string(),
                    )
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true)
                    .reply_markup(markup.clone())
            })
            .await;

        match res {
            Ok(_) => Ok(()),
            Err(Error::External(s)) if is_not_modified(&s) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}

/// Telegram rejects an edit that changes nothing; for us that is success.
fn is_not_modified(message: &str) -> bool {
    message.contains("message is not modified")
}
