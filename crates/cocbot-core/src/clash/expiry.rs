use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::session::{ClashSession, HandlerSignal};

/// One-shot timer owned by a consumer whose chat interaction will stop
/// accepting edits. When it fires the session's handler receives
/// [`HandlerSignal::InteractionTimedOut`]; the session itself keeps running.
///
/// Dropping the timer cancels it.
#[derive(Debug)]
pub struct InteractionExpiry {
    cancel: CancellationToken,
}

impl InteractionExpiry {
    pub fn schedule(session: ClashSession, after: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(after) => {
                    if session.is_closed() {
                        return;
                    }
                    debug!(handle = %session.handle(), "interaction expired");
                    session.signal(HandlerSignal::InteractionTimedOut).await;
                }
            }
        });
        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for InteractionExpiry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
