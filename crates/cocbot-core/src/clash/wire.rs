//! JSON payloads exchanged with the contest service and their mapping onto
//! [`ClashState`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{ClashProgress, ClashState, GameMode, Player, PlayerResult};

/// Progress fields shared by the REST snapshot and the push delta.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressFields {
    pub started: bool,
    pub finished: bool,
    /// Absent on deltas that do not touch the lobby options.
    pub programming_languages: Option<Vec<String>>,
    pub modes: Option<Vec<GameMode>>,
    pub mode: Option<GameMode>,
    pub ms_before_end: Option<i64>,
}

/// Why a payload cannot be mapped onto a [`ClashState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField(pub &'static str);

impl ProgressFields {
    /// A lobby that is closed without ever starting still reports `finished`;
    /// it maps to `Finished` whenever a mode is known.
    fn progress(&self, now: DateTime<Utc>) -> Result<ClashProgress, MissingField> {
        if self.finished {
            let mode = self
                .mode
                .or_else(|| self.modes.as_ref().and_then(|m| m.first().copied()));
            match (mode, self.started) {
                (Some(mode), _) => return Ok(ClashProgress::Finished { mode }),
                (None, true) => return Err(MissingField("mode")),
                (None, false) => return Ok(ClashProgress::Lobby),
            }
        }
        if !self.started {
            return Ok(ClashProgress::Lobby);
        }
        let mode = self.mode.ok_or(MissingField("mode"))?;
        let ms = self.ms_before_end.ok_or(MissingField("msBeforeEnd"))?;
        Ok(ClashProgress::Running {
            mode,
            end_date: now + chrono::Duration::milliseconds(ms.max(0)),
        })
    }
}

// ============== find-session ==============

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindClashResponse {
    #[serde(flatten)]
    pub progress: ProgressFields,
    #[serde(default)]
    pub players: Vec<FindPlayer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindPlayer {
    pub codingamer_id: u64,
    pub codingamer_nickname: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub rank: u32,
    pub criterion: Option<u64>,
    pub test_session_status: Option<String>,
}

impl FindClashResponse {
    pub fn into_state(self, handle: &str, now: DateTime<Utc>) -> Result<ClashState, MissingField> {
        let progress = self.progress.progress(now)?;
        let started = self.progress.started;
        let players = self
            .players
            .into_iter()
            .map(|p| Player {
                result: started.then(|| PlayerResult {
                    completed: p.test_session_status.as_deref() == Some("COMPLETED"),
                    rank: p.rank,
                    score: p.score,
                    duration: Duration::from_millis(p.duration),
                    criterion: p.criterion,
                }),
                nickname: p.codingamer_nickname,
                user_id: p.codingamer_id,
            })
            .collect();

        Ok(ClashState {
            handle: handle.to_string(),
            languages: self.progress.programming_languages.unwrap_or_default(),
            modes: self.progress.modes.unwrap_or_default(),
            players,
            progress,
        })
    }
}

// ============== push delta (`clashDto`) ==============

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClashDto {
    pub public_handle: Option<String>,
    #[serde(flatten)]
    pub progress: ProgressFields,
    #[serde(default)]
    pub minified_players: Vec<MinifiedPlayer>,
}

/// Player entry of the push delta; the service shortens its keys.
#[derive(Debug, Clone, Deserialize)]
pub struct MinifiedPlayer {
    pub id: u64,
    #[serde(rename = "k")]
    pub nickname: String,
    #[serde(rename = "d", default)]
    pub score: u32,
    #[serde(rename = "r", default)]
    pub rank: u32,
}

impl UpdateClashDto {
    /// The delta carries no completion or timing details, so they start out
    /// empty. Lobby options the delta leaves out keep their `current` value.
    pub fn into_state(
        self,
        current: &ClashState,
        now: DateTime<Utc>,
    ) -> Result<ClashState, MissingField> {
        let progress = self.progress.progress(now)?;
        let started = self.progress.started;
        let players = self
            .minified_players
            .into_iter()
            .map(|p| Player {
                result: started.then(|| PlayerResult {
                    completed: false,
                    rank: p.rank,
                    score: p.score,
                    duration: Duration::ZERO,
                    criterion: None,
                }),
                nickname: p.nickname,
                user_id: p.id,
            })
            .collect();

        Ok(ClashState {
            handle: current.handle.clone(),
            languages: self
                .progress
                .programming_languages
                .unwrap_or_else(|| current.languages.clone()),
            modes: self
                .progress
                .modes
                .unwrap_or_else(|| current.modes.clone()),
            players,
            progress,
        })
    }
}

// ============== create / submission window / problem ==============

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClashResponse {
    pub public_handle: Option<String>,
    #[serde(default)]
    pub players: Vec<CreatePlayer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlayer {
    pub codingamer_id: u64,
    pub codingamer_nickname: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestSessionResponse {
    pub handle: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemResponse {
    pub current_question: Option<CurrentQuestion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentQuestion {
    pub question: Option<Question>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub statement: String,
    #[serde(default)]
    pub stub_generator: String,
    #[serde(default)]
    pub test_cases: Vec<TestCaseRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseRef {
    pub input_binary_id: u64,
    pub output_binary_id: u64,
}

// ============== push `clash` event ==============

/// Payload of the push channel's `clash` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClashPush {
    pub status: Option<String>,
    /// JSON-encoded [`UpdateClashDto`], present on `updateCurrentClash`.
    pub clash_dto: Option<String>,
    /// Present on `updateClash`.
    pub clash_handle: Option<String>,
}

pub const STATUS_UPDATE_CURRENT: &str = "updateCurrentClash";
pub const STATUS_UPDATE: &str = "updateClash";
