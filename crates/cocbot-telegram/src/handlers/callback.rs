use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;
use tracing::{debug, info, warn};

use cocbot_core::{
    clash::{ClashSession, Submission},
    domain::{ChatId, MessageId, MessageRef, UserId},
    security::is_authorized,
};

use crate::{
    actions::CallbackAction,
    consumer::{should_rearm, ChatClashHandler},
    render,
    router::AppState,
};

use super::commands::create_clash;

const ACCESS_DENIED: &str = "Access denied: only the host can start this clash.";
const START_SENT: &str = "Start signal sent!";
const START_FAILED: &str =
    "Something went wrong while sending the start signal, did the game already start?";

/// A button press reduced to what the actions need.
#[derive(Clone, Debug)]
pub struct Clicked {
    pub callback_id: String,
    pub user: UserId,
    pub message: Option<MessageRef>,
}

pub(super) async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let data = q.data.clone().unwrap_or_default();
    let user_id = UserId(q.from.id.0 as i64);

    if !is_authorized(Some(user_id), &state.cfg.telegram_allowed_users) {
        let _ = bot
            .answer_callback_query(q.id.clone())
            .text("Unauthorized".to_string())
            .await;
        return Ok(());
    }

    let Some(action) = CallbackAction::parse(&data) else {
        debug!(data = %data, "ignoring unknown callback");
        let _ = bot.answer_callback_query(q.id.clone()).await;
        return Ok(());
    };

    let clicked = Clicked {
        callback_id: q.id.clone(),
        user: user_id,
        message: q.message.as_ref().map(|m| MessageRef {
            chat_id: ChatId(m.chat.id.0),
            message_id: MessageId(m.id.0),
        }),
    };
    on_action(&state, clicked, action).await;
    Ok(())
}

pub async fn on_action(state: &AppState, clicked: Clicked, action: CallbackAction) {
    let answer = match action {
        CallbackAction::Start { owner, handle } => {
            Some(start(state, clicked.user, owner, &handle).await)
        }
        CallbackAction::Continue { owner, handle } => {
            if let Some(message) = clicked.message {
                resume(state, message, owner, &handle).await;
            }
            None
        }
        CallbackAction::Again { modes, languages } => {
            if let Some(message) = clicked.message {
                create_clash(state, message.chat_id, clicked.user, languages, modes).await;
            }
            None
        }
        CallbackAction::DeletePing => {
            if let Some(message) = clicked.message {
                if let Err(e) = state.messenger.delete_message(message).await {
                    warn!(error = %e, "could not delete ping reply");
                }
            }
            None
        }
    };

    if let Err(e) = state
        .messenger
        .answer_callback_query(&clicked.callback_id, answer)
        .await
    {
        debug!(error = %e, "callback answer failed");
    }
}

async fn start(state: &AppState, user: UserId, owner: UserId, handle: &str) -> &'static str {
    if user != owner {
        return ACCESS_DENIED;
    }

    let result = match state.deps.registry.get(handle).await {
        Some(session) => session.start().await,
        None => state.deps.api.start_session(handle).await,
    };
    match result {
        Ok(()) => START_SENT,
        Err(e) => {
            info!(handle, error = %e, "start refused");
            START_FAILED
        }
    }
}

/// Re-bind `message` to the clash after its interaction expired or the
/// session dropped.
async fn resume(state: &AppState, message: MessageRef, owner: UserId, handle: &str) {
    let handler = ChatClashHandler::new(
        state.messenger.clone(),
        message,
        owner,
        state.cfg.interaction_timeout,
    );

    let session =
        match ClashSession::create_existing(state.deps.clone(), handle, handler.clone()).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                handler.show(render::gone()).await;
                return;
            }
            Err(e) => {
                warn!(handle, error = %e, "could not re-attach to clash");
                return;
            }
        };
    session.set_receive_signals(true);

    let Some(me) = session.me().await else {
        // Nothing left to drive without our own player entry.
        session.detach().await;
        session.disconnect(None).await;
        handler.show(render::unmanageable()).await;
        return;
    };

    let clash = session.state().await;
    let completed = me.result.as_ref().is_some_and(|r| r.completed);
    if clash.is_running() && !completed {
        if let Some(ai) = state.ai.clone() {
            let session = session.clone();
            tokio::spawn(async move {
                match session.submit(Submission::Provider(ai), None).await {
                    Ok(()) => info!(handle = %session.handle(), "submitted assisted solution"),
                    Err(e) => warn!(handle = %session.handle(), error = %e, "assisted submission failed"),
                }
            });
        }
    }

    handler.refresh(&session).await;
    if !session.is_closed() && should_rearm(&clash, state.cfg.interaction_timeout, Utc::now()) {
        handler.arm(&session);
    }
}
