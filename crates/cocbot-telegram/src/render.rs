//! HTML views of a clash for a chat message.

use chrono::{DateTime, Utc};
use tracing::warn;

use cocbot_core::{
    clash::{ClashProgress, ClashState, Player},
    domain::UserId,
    formatting::{escape_html, format_duration, format_remaining, grid_table, pre},
    messaging::types::{InlineButton, InlineKeyboard},
};

use crate::actions::CallbackAction;

const LANGUAGE_COLUMNS: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendered {
    pub html: String,
    pub keyboard: Option<InlineKeyboard>,
}

pub fn clash_url(handle: &str) -> String {
    format!("https://www.codingame.com/clashofcode/clash/{handle}")
}

fn title(state: &ClashState, connected: bool) -> String {
    let phase = match &state.progress {
        ClashProgress::Lobby => "Lobby".to_string(),
        ClashProgress::Running { mode, .. } => mode.to_string(),
        ClashProgress::Finished { .. } => "Finished".to_string(),
    };
    let suffix = if connected || state.finished() {
        ""
    } else {
        " - reconnecting"
    };
    format!("<b>Clash of Code - {phase}{suffix}</b>")
}

fn summary(state: &ClashState, owner: UserId, now: DateTime<Utc>) -> String {
    match &state.progress {
        ClashProgress::Lobby => format!(
            "<a href=\"tg://user?id={}\">The host</a> can start the game. Others may start a new game.",
            owner.0
        ),
        ClashProgress::Running { end_date, .. } => {
            let mut s = "The game is currently running. Join now, before it ends!".to_string();
            if let Some(left) = format_remaining(*end_date, now) {
                s.push_str(&format!("\n<i>Ends in {left}</i>"));
            }
            s
        }
        ClashProgress::Finished { .. } => {
            let mut s = "The game has finished.".to_string();
            if let Some(winner) = state.winner() {
                s.push_str(&format!(
                    "\n<b>{} is the winner!</b>",
                    escape_html(&winner.nickname)
                ));
            }
            s
        }
    }
}

/// One line per player: join order in the lobby, rank once started.
pub fn player_line(player: &Player) -> String {
    let nickname = escape_html(&player.nickname);
    let Some(r) = &player.result else {
        return format!("- {nickname}");
    };
    if !r.completed {
        return format!("{}. ⌛ {nickname}", r.rank);
    }
    let status = match r.score {
        100 => "✅",
        0 => "❌",
        _ => "🟡",
    };
    let mut line = format!(
        "{}. {status} {nickname} - {}% in {}",
        r.rank,
        r.score,
        format_duration(r.duration)
    );
    if let Some(c) = r.criterion {
        line.push_str(&format!(" ({c} bytes)"));
    }
    line
}

fn body(state: &ClashState) -> String {
    let languages: Vec<String> = if state.languages.is_empty() {
        vec!["All".to_string()]
    } else {
        state.languages.clone()
    };

    let players: Vec<String> = if state.started() {
        state.ranked_players().into_iter().map(player_line).collect()
    } else {
        state.players.iter().map(player_line).collect()
    };
    let players = if players.is_empty() {
        "<i>nobody yet</i>".to_string()
    } else {
        players.join("\n")
    };

    let modes: Vec<String> = state.modes.iter().map(|m| format!("- {m}")).collect();

    format!(
        "<b>Programming languages</b>\n{}\n\n<b>Players ({})</b>\n{players}\n\n<b>Game modes</b>\n{}",
        pre(&grid_table(LANGUAGE_COLUMNS, &languages)),
        state.player_count(),
        modes.join("\n")
    )
}

fn button(label: &str, action: CallbackAction) -> Option<InlineButton> {
    match action.to_data() {
        Some(data) => Some(InlineButton::callback(label, data)),
        None => {
            warn!(label, "callback data too long, leaving the button out");
            None
        }
    }
}

fn play_again(state: &ClashState) -> Option<InlineButton> {
    button(
        "Play again",
        CallbackAction::Again {
            modes: state.modes.clone(),
            languages: state.languages.clone(),
        },
    )
}

fn continue_button(handle: &str, owner: UserId) -> Option<InlineButton> {
    button(
        "Continue",
        CallbackAction::Continue {
            owner,
            handle: handle.to_string(),
        },
    )
}

/// The live view: title, summary, languages, players, modes and the action row.
pub fn clash_view(
    state: &ClashState,
    owner: UserId,
    connected: bool,
    now: DateTime<Utc>,
) -> Rendered {
    let html = format!(
        "{}\n{}\n\n{}",
        title(state, connected),
        summary(state, owner, now),
        body(state)
    );

    let mut row = vec![InlineButton::url("Open", clash_url(&state.handle))];
    if !state.started() {
        row.extend(button(
            "Start",
            CallbackAction::Start {
                owner,
                handle: state.handle.clone(),
            },
        ));
    }
    row.extend(play_again(state));

    Rendered {
        html,
        keyboard: Some(InlineKeyboard::single_row(row)),
    }
}

/// Replaces the live view once the message stops being updated.
pub fn continue_prompt(handle: &str, owner: UserId) -> Rendered {
    Rendered {
        html: "<b>Clash of Code</b>\nPlease update this message by pressing the button below."
            .to_string(),
        keyboard: Some(InlineKeyboard::single_row(
            continue_button(handle, owner).into_iter().collect(),
        )),
    }
}

pub fn lobby_timed_out(state: &ClashState) -> Rendered {
    Rendered {
        html: "<b>Clash of Code</b>\nThis clash has timed out, please create a new one."
            .to_string(),
        keyboard: Some(InlineKeyboard::single_row(play_again(state).into_iter().collect())),
    }
}

/// Last known state plus a way back in.
pub fn disconnected(state: &ClashState, owner: UserId, now: DateTime<Utc>) -> Rendered {
    let live = clash_view(state, owner, true, now);
    let mut row = vec![InlineButton::url("Open", clash_url(&state.handle))];
    row.extend(continue_button(&state.handle, owner));
    row.extend(play_again(state));
    Rendered {
        html: format!("{}\n\n<i>Lost connection to this clash.</i>", live.html),
        keyboard: Some(InlineKeyboard::single_row(row)),
    }
}

pub fn unmanageable() -> Rendered {
    Rendered {
        html: "<b>Clash of Code</b>\nUnable to manage this game anymore. I probably disconnected before the game started."
            .to_string(),
        keyboard: None,
    }
}

pub fn gone() -> Rendered {
    Rendered {
        html: "<b>Clash of Code</b>\nThis clash does not exist anymore.".to_string(),
        keyboard: None,
    }
}
