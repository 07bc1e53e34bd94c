use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{port::MessagingPort, types::InlineKeyboard},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two outbound calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between calls touching the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

/// Hands out evenly spaced start times.
#[derive(Debug)]
struct Spacing {
    interval: Duration,
    next: Instant,
}

impl Spacing {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Book the next slot and return how long to wait for it.
    fn book(&mut self) -> Duration {
        let now = Instant::now();
        let start = self.next.max(now);
        self.next = start + self.interval;
        start - now
    }
}

/// [`MessagingPort`] decorator that spaces outbound calls and coalesces edits.
///
/// Push updates can arrive faster than a chat accepts edits. While an edit of a
/// message waits for its slot, a newer edit of the same message supersedes it
/// and the older one is skipped.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<Spacing>,
    per_chat: Mutex<HashMap<ChatId, Spacing>>,
    edit_generation: Mutex<HashMap<MessageRef, u64>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(Spacing::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
            edit_generation: Mutex::new(HashMap::new()),
        }
    }

    async fn wait_for_chat(&self, chat_id: ChatId) {
        let global = self.global.lock().await.book();
        let chat = {
            let mut map = self.per_chat.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Spacing::new(self.cfg.per_chat_min_interval))
                .book()
        };
        let wait = global.max(chat);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn wait_global(&self) {
        let wait = self.global.lock().await.book();
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.wait_for_chat(chat_id).await;
        self.inner.send_html(chat_id, html, keyboard).await
    }

    async fn edit_html(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let generation = {
            let mut map = self.edit_generation.lock().await;
            let g = map.entry(msg).or_insert(0);
            *g += 1;
            *g
        };

        self.wait_for_chat(msg.chat_id).await;

        let latest = self.edit_generation.lock().await.get(&msg).copied();
        if latest != Some(generation) {
            debug!(message_id = msg.message_id.0, "skipping superseded edit");
            return Ok(());
        }
        self.inner.edit_html(msg, html, keyboard).await
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.edit_generation.lock().await.remove(&msg);
        self.wait_for_chat(msg.chat_id).await;
        self.inner.delete_message(msg).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // Callback answers carry no chat id.
        self.wait_global().await;
        self.inner.answer_callback_query(callback_id, text).await
    }
}
