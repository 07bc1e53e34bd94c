//! Session state as seen by the bot: one flat, validated view over the
//! service's lobby and in-game payload shapes.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Languages the contest service accepts, by their service id.
pub const LANGUAGES: &[&str] = &[
    "Bash",
    "C",
    "C#",
    "C++",
    "Clojure",
    "D",
    "Dart",
    "F#",
    "Go",
    "Groovy",
    "Haskell",
    "Java",
    "Javascript",
    "Kotlin",
    "Lua",
    "OCaml",
    "ObjectiveC",
    "PHP",
    "Pascal",
    "Perl",
    "Python3",
    "Ruby",
    "Rust",
    "Scala",
    "Swift",
    "TypeScript",
    "VB.NET",
];

/// Language used when a session allows every language.
pub const FALLBACK_LANGUAGE: &str = "Ruby";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    Fastest,
    Shortest,
    Reverse,
}

impl GameMode {
    pub const ALL: [GameMode; 3] = [GameMode::Fastest, GameMode::Shortest, GameMode::Reverse];

    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Fastest => "FASTEST",
            GameMode::Shortest => "SHORTEST",
            GameMode::Reverse => "REVERSE",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown game mode: {s}"))
    }
}

/// Case-insensitive lookup of a service language id.
pub fn normalize_language(input: &str) -> Option<&'static str> {
    let input = input.trim();
    LANGUAGES
        .iter()
        .copied()
        .find(|l| l.eq_ignore_ascii_case(input))
}

/// Parse a user-supplied language list (comma or whitespace separated).
///
/// Unknown entries are dropped; `all` anywhere means "every language", which the
/// service expresses as an empty list.
pub fn parse_languages(input: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in input.split([',', ' ']).filter(|s| !s.trim().is_empty()) {
        if raw.trim().eq_ignore_ascii_case("all") {
            return Vec::new();
        }
        if let Some(lang) = normalize_language(raw) {
            if !out.iter().any(|l| l == lang) {
                out.push(lang.to_string());
            }
        }
    }
    out
}

/// Parse a user-supplied mode list; defaults to `SHORTEST` when nothing valid is given.
pub fn parse_modes(input: &str) -> Vec<GameMode> {
    let mut out = Vec::new();
    for mode in input
        .split([',', ' ', '&'])
        .filter_map(|s| s.parse::<GameMode>().ok())
    {
        if !out.contains(&mode) {
            out.push(mode);
        }
    }
    if out.is_empty() {
        out.push(GameMode::Shortest);
    }
    out
}

/// Encode a subset of `universe` as a hex bitmask (compact enough for button payloads).
pub fn encode_subset<S: AsRef<str>>(items: &[S], universe: &[&str]) -> String {
    let mask = universe
        .iter()
        .enumerate()
        .filter(|(_, u)| items.iter().any(|i| i.as_ref() == **u))
        .fold(0u64, |acc, (idx, _)| acc | (1 << idx));
    format!("{mask:x}")
}

pub fn decode_subset(encoded: &str, universe: &[&str]) -> Vec<String> {
    let Ok(mask) = u64::from_str_radix(encoded, 16) else {
        return Vec::new();
    };
    universe
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx < 64 && mask & (1 << idx) != 0)
        .map(|(_, u)| u.to_string())
        .collect()
}

pub fn mode_names() -> [&'static str; 3] {
    GameMode::ALL.map(GameMode::as_str)
}

/// Result details that exist once the duel has started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerResult {
    pub completed: bool,
    pub rank: u32,
    pub score: u32,
    pub duration: Duration,
    /// Secondary tie-break metric, e.g. code size in SHORTEST mode.
    pub criterion: Option<u64>,
}

/// One participant. Identity is `user_id`; entries are replaced wholesale on update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Player {
    pub nickname: String,
    pub user_id: u64,
    pub result: Option<PlayerResult>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClashProgress {
    Lobby,
    Running {
        mode: GameMode,
        end_date: DateTime<Utc>,
    },
    Finished {
        mode: GameMode,
    },
}

impl ClashProgress {
    fn ordinal(&self) -> u8 {
        match self {
            ClashProgress::Lobby => 0,
            ClashProgress::Running { .. } => 1,
            ClashProgress::Finished { .. } => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClashState {
    pub handle: String,
    /// Empty means any language.
    pub languages: Vec<String>,
    pub modes: Vec<GameMode>,
    pub players: Vec<Player>,
    pub progress: ClashProgress,
}

impl ClashState {
    pub fn lobby(handle: impl Into<String>, languages: Vec<String>, modes: Vec<GameMode>) -> Self {
        Self {
            handle: handle.into(),
            languages,
            modes,
            players: Vec::new(),
            progress: ClashProgress::Lobby,
        }
    }

    pub fn started(&self) -> bool {
        !matches!(self.progress, ClashProgress::Lobby)
    }

    pub fn finished(&self) -> bool {
        matches!(self.progress, ClashProgress::Finished { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self.progress, ClashProgress::Running { .. })
    }

    pub fn mode(&self) -> Option<GameMode> {
        match self.progress {
            ClashProgress::Lobby => None,
            ClashProgress::Running { mode, .. } | ClashProgress::Finished { mode } => Some(mode),
        }
    }

    /// Deadline, present only while running.
    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        match self.progress {
            ClashProgress::Running { end_date, .. } => Some(end_date),
            _ => None,
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, user_id: u64) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn winner(&self) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.result.as_ref().is_some_and(|r| r.rank == 1))
    }

    /// Whether `lang` may be submitted in this session.
    pub fn allows_language(&self, lang: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == lang)
    }

    /// Language used for automatic submissions.
    pub fn default_language(&self) -> &str {
        self.languages
            .first()
            .map(String::as_str)
            .unwrap_or(FALLBACK_LANGUAGE)
    }

    /// Whether replacing `self` with `next` keeps progress monotonic
    /// (lobby → running → finished, never backwards).
    pub fn accepts(&self, next: &ClashState) -> bool {
        next.progress.ordinal() >= self.progress.ordinal()
    }

    /// Players sorted by rank (unranked lobby players keep their join order).
    pub fn ranked_players(&self) -> Vec<&Player> {
        let mut players: Vec<&Player> = self.players.iter().collect();
        players.sort_by_key(|p| p.result.as_ref().map(|r| r.rank).unwrap_or(u32::MAX));
        players
    }
}
