use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};

use cocbot_core::{
    clash::{
        types::{parse_languages, parse_modes},
        ClashSession, GameMode,
    },
    domain::{ChatId, UserId},
    formatting::escape_html,
    messaging::types::{InlineButton, InlineKeyboard},
};

use crate::{actions::CallbackAction, consumer::ChatClashHandler, router::AppState};

pub fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// `/coc` arguments in any order: mode names go to modes, everything else is
/// read as a language.
pub fn parse_coc_args(arg: &str) -> (Vec<GameMode>, Vec<String>) {
    let (modes, languages): (Vec<&str>, Vec<&str>) = arg
        .split([',', ' ', '&'])
        .filter(|s| !s.trim().is_empty())
        .partition(|s| s.parse::<GameMode>().is_ok());
    (
        parse_modes(&modes.join(",")),
        parse_languages(&languages.join(",")),
    )
}

const HELP: &str = "<b>Clash of Code bot</b>\n\n\
<b>Commands:</b>\n\
/coc [modes] [languages] - Create a private clash lobby\n\
/ping - Check that the bot is alive\n\
/help - Show this message\n\n\
<b>Examples:</b>\n\
<code>/coc</code> - shortest mode, any language\n\
<code>/coc fastest reverse</code>\n\
<code>/coc shortest ruby,python3</code>\n\n\
Modes: fastest, shortest, reverse. Only the creator of a lobby can start it.";

pub(super) async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let (cmd, arg) = parse_command(text);

    match cmd.as_str() {
        "start" | "help" => {
            let _ = state.messenger.send_html(chat_id, HELP, None).await;
        }
        "ping" => ping(&state, chat_id).await,
        "coc" | "clash" => {
            let (modes, languages) = parse_coc_args(&arg);
            create_clash(&state, chat_id, user_id, languages, modes).await;
        }
        _ => {
            let msg = format!("Unknown command: /{}", escape_html(&cmd));
            let _ = state.messenger.send_html(chat_id, &msg, None).await;
        }
    }
    Ok(())
}

async fn ping(state: &AppState, chat_id: ChatId) {
    let keyboard = InlineKeyboard::single_row(vec![InlineButton::callback(
        "Delete",
        CallbackAction::DeletePing.encode(),
    )]);
    if let Err(e) = state.messenger.send_html(chat_id, "Pong!", Some(keyboard)).await {
        warn!(chat_id = chat_id.0, error = %e, "ping reply failed");
    }
}

/// Create a lobby and bind it to a fresh message in `chat_id`.
///
/// Shared by `/coc` and the "Play again" button.
pub async fn create_clash(
    state: &AppState,
    chat_id: ChatId,
    owner: UserId,
    languages: Vec<String>,
    modes: Vec<GameMode>,
) {
    if let Err(wait) = state.cooldown.lock().await.check(chat_id.0) {
        info!(chat_id = chat_id.0, wait_secs = wait.as_secs(), "clash creation rate-limited");
        let msg = format!(
            "<b>Clash of Code - Rate limited</b>\nHi, there's a rate-limit of {} seconds on this command. \
This is to prevent button/command-spamming.",
            state.cfg.create_cooldown.as_secs()
        );
        let _ = state.messenger.send_html(chat_id, &msg, None).await;
        return;
    }

    let placeholder = match state
        .messenger
        .send_html(chat_id, "<b>Clash of Code</b>\nCreating a clash...", None)
        .await
    {
        Ok(m) => m,
        Err(e) => {
            warn!(chat_id = chat_id.0, error = %e, "could not post clash message");
            return;
        }
    };

    let handler = ChatClashHandler::new(
        state.messenger.clone(),
        placeholder,
        owner,
        state.cfg.interaction_timeout,
    );

    let session = match ClashSession::create_new(
        state.deps.clone(),
        &languages,
        &modes,
        handler.clone(),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            error!(chat_id = chat_id.0, error = %e, "clash creation failed");
            let _ = state
                .messenger
                .edit_html(
                    placeholder,
                    "<b>Clash of Code - Error</b>\nSomething went wrong with creating the clash.",
                    None,
                )
                .await;
            return;
        }
    };

    info!(chat_id = chat_id.0, owner = owner.0, handle = %session.handle(), "clash bound to chat");
    handler.refresh(&session).await;
    handler.arm(&session);
}
