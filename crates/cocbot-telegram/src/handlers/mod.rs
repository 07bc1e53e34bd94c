//! Telegram update handlers.
//!
//! Each entry point checks authorization, then hands plain ids to logic that
//! only talks to the [`AppState`] ports, so it can be exercised with fakes.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use cocbot_core::domain::UserId;
use cocbot_core::security::is_authorized;

use crate::router::AppState;

mod callback;
mod commands;

pub use callback::{on_action, Clicked};
pub use commands::{create_clash, parse_coc_args, parse_command};

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| u.id.0);

    let Some(text) = msg.text() else {
        return Ok(());
    };
    if !text.starts_with('/') {
        return Ok(());
    }

    if !is_authorized(
        user_id.map(|id| UserId(id as i64)),
        &state.cfg.telegram_allowed_users,
    ) {
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }

    commands::handle_command(msg, state).await
}
