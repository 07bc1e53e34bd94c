use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use cocbot_core::{
    clash::{ClashHandler, ClashSession, ClashState, HandlerSignal, InteractionExpiry},
    domain::{MessageRef, UserId},
    messaging::port::MessagingPort,
};

use crate::render::{self, Rendered};

/// Mirrors one clash into one chat message.
///
/// The message is live until its interaction expires. It then turns into a
/// "continue" prompt and the session stops calling this handler; pressing the
/// button attaches a fresh consumer.
pub struct ChatClashHandler {
    messenger: Arc<dyn MessagingPort>,
    message: MessageRef,
    owner: UserId,
    interaction_timeout: Duration,
    expiry: std::sync::Mutex<Option<InteractionExpiry>>,
}

impl ChatClashHandler {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        message: MessageRef,
        owner: UserId,
        interaction_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            messenger,
            message,
            owner,
            interaction_timeout,
            expiry: std::sync::Mutex::new(None),
        })
    }

    /// (Re)start the interaction expiry for `session`.
    pub fn arm(&self, session: &ClashSession) {
        let timer = InteractionExpiry::schedule(session.clone(), self.interaction_timeout);
        if let Ok(mut slot) = self.expiry.lock() {
            *slot = Some(timer);
        }
    }

    pub fn disarm(&self) {
        if let Ok(mut slot) = self.expiry.lock() {
            slot.take();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.expiry
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|t| !t.is_cancelled()))
            .unwrap_or(false)
    }

    pub async fn show(&self, view: Rendered) {
        if let Err(e) = self
            .messenger
            .edit_html(self.message, &view.html, view.keyboard)
            .await
        {
            warn!(
                chat_id = self.message.chat_id.0,
                message_id = self.message.message_id.0,
                error = %e,
                "failed to update clash message"
            );
        }
    }

    /// Render the current state of `session` into the message.
    pub async fn refresh(&self, session: &ClashSession) {
        let state = session.state().await;
        self.show(render::clash_view(
            &state,
            self.owner,
            session.connected(),
            Utc::now(),
        ))
        .await;
    }
}

#[async_trait]
impl ClashHandler for ChatClashHandler {
    async fn on_update(&self, session: &ClashSession, signal: Option<HandlerSignal>) {
        let state = session.state().await;
        let now = Utc::now();
        debug!(handle = %state.handle, ?signal, "clash update");

        let view = match signal {
            None => render::clash_view(&state, self.owner, session.connected(), now),
            Some(HandlerSignal::InteractionTimedOut) => {
                self.disarm();
                session.set_receive_signals(false);
                render::continue_prompt(&state.handle, self.owner)
            }
            Some(HandlerSignal::LobbyTimedOut) => {
                self.disarm();
                render::lobby_timed_out(&state)
            }
            Some(HandlerSignal::Disconnected) => {
                self.disarm();
                render::disconnected(&state, self.owner, now)
            }
            Some(HandlerSignal::Finished) => {
                self.disarm();
                render::clash_view(&state, self.owner, true, now)
            }
        };
        self.show(view).await;
    }
}

/// Whether a re-attached message should get another expiry timer: always in the
/// lobby, and while running only if the duel outlives one more window.
pub fn should_rearm(state: &ClashState, window: Duration, now: DateTime<Utc>) -> bool {
    if !state.started() {
        return true;
    }
    let Some(end) = state.end_date() else {
        return false;
    };
    (end - now)
        .to_std()
        .map(|left| left > window)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeMessenger, StubApi};
    use cocbot_core::clash::{ClashProgress, GameMode};

    #[test]
    fn rearms_only_with_a_window_left() {
        let now = Utc::now();
        let window = Duration::from_secs(600);
        let mut s = ClashState::lobby("h", vec![], vec![GameMode::Fastest]);
        assert!(should_rearm(&s, window, now));

        s.progress = ClashProgress::Running {
            mode: GameMode::Fastest,
            end_date: now + chrono::Duration::seconds(900),
        };
        assert!(should_rearm(&s, window, now));

        s.progress = ClashProgress::Running {
            mode: GameMode::Fastest,
            end_date: now + chrono::Duration::seconds(300),
        };
        assert!(!should_rearm(&s, window, now));

        s.progress = ClashProgress::Finished {
            mode: GameMode::Fastest,
        };
        assert!(!should_rearm(&s, window, now));
    }

    #[tokio::test]
    async fn interaction_timeout_turns_message_into_continue_prompt() {
        let messenger = FakeMessenger::new();
        let api = StubApi::new(testing::lobby("abc", 2));
        let (session, handler) = testing::live_session(api, messenger.clone()).await;

        session.signal(HandlerSignal::InteractionTimedOut).await;
        assert!(!session.receives_signals());
        assert!(!handler.is_armed());

        let last = messenger.last_edit().unwrap();
        assert!(last.0.contains("pressing the button below"));
        assert!(last.1.contains(&"Continue".to_string()));

        // Further updates stay silent until someone presses Continue.
        let before = messenger.calls().len();
        session.signal(HandlerSignal::Finished).await;
        assert_eq!(messenger.calls().len(), before);
    }

    #[tokio::test]
    async fn terminal_signals_render_final_views() {
        let messenger = FakeMessenger::new();
        let api = StubApi::new(testing::lobby("abc", 1));
        let (session, handler) = testing::live_session(api, messenger.clone()).await;
        handler.arm(&session);

        session.disconnect(Some(HandlerSignal::LobbyTimedOut)).await;
        let (html, labels) = messenger.last_edit().unwrap();
        assert!(html.contains("timed out"));
        assert_eq!(labels, vec!["Play again".to_string()]);
        assert!(session.is_closed());
        assert!(!handler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn armed_handler_expires_into_prompt() {
        let messenger = FakeMessenger::new();
        let api = StubApi::new(testing::lobby("abc", 2));
        let (session, handler) = testing::live_session(api, messenger.clone()).await;

        handler.arm(&session);
        assert!(handler.is_armed());
        tokio::time::sleep(testing::INTERACTION_TIMEOUT + Duration::from_secs(1)).await;

        let (html, _) = messenger.last_edit().unwrap();
        assert!(html.contains("pressing the button below"));
        assert!(!session.receives_signals());
    }
}
