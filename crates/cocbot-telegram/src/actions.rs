//! Button payloads.
//!
//! Telegram hands callback data back verbatim and caps it at 64 bytes, so every
//! action is a short `:`-separated string. Language and mode lists travel as hex
//! bitmasks.

use cocbot_core::{
    clash::{
        types::{decode_subset, encode_subset, mode_names, LANGUAGES},
        GameMode,
    },
    domain::UserId,
    messaging::types::MAX_CALLBACK_DATA,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    /// Start the lobby. Only `owner` may press it.
    Start { owner: UserId, handle: String },
    /// Re-attach a message to a live clash after its interaction expired.
    Continue { owner: UserId, handle: String },
    /// Create a fresh lobby with the same options.
    Again {
        modes: Vec<GameMode>,
        languages: Vec<String>,
    },
    DeletePing,
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        match self {
            CallbackAction::Start { owner, handle } => format!("coc:start:{}:{handle}", owner.0),
            CallbackAction::Continue { owner, handle } => {
                format!("coc:cont:{}:{handle}", owner.0)
            }
            CallbackAction::Again { modes, languages } => {
                let modes: Vec<&str> = modes.iter().map(|m| m.as_str()).collect();
                format!(
                    "coc:again:{}:{}",
                    encode_subset(&modes, &mode_names()),
                    encode_subset(languages, LANGUAGES)
                )
            }
            CallbackAction::DeletePing => "ping:delete".to_string(),
        }
    }

    /// `None` for anything that is not one of ours or is malformed.
    pub fn parse(data: &str) -> Option<Self> {
        let parts: Vec<&str> = data.split(':').collect();
        match parts.as_slice() {
            ["ping", "delete"] => Some(CallbackAction::DeletePing),
            ["coc", "start", owner, handle] => Some(CallbackAction::Start {
                owner: UserId(owner.parse().ok()?),
                handle: valid_handle(handle)?,
            }),
            ["coc", "cont", owner, handle] => Some(CallbackAction::Continue {
                owner: UserId(owner.parse().ok()?),
                handle: valid_handle(handle)?,
            }),
            ["coc", "again", modes, languages] => {
                let mut modes: Vec<GameMode> = decode_subset(modes, &mode_names())
                    .iter()
                    .filter_map(|m| m.parse().ok())
                    .collect();
                if modes.is_empty() {
                    modes.push(GameMode::Shortest);
                }
                Some(CallbackAction::Again {
                    modes,
                    languages: decode_subset(languages, LANGUAGES),
                })
            }
            _ => None,
        }
    }

    /// Encoded form, or `None` when it would not fit in a button.
    pub fn to_data(&self) -> Option<String> {
        let data = self.encode();
        (data.len() <= MAX_CALLBACK_DATA).then_some(data)
    }
}

fn valid_handle(handle: &str) -> Option<String> {
    let ok = !handle.is_empty() && handle.chars().all(|c| c.is_ascii_alphanumeric());
    ok.then(|| handle.to_string())
}
