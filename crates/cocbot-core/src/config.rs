use std::{env, fs, path::Path, time::Duration};

use crate::{domain::ContestUserId, errors::Error, Result};

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Chat platform
    pub telegram_bot_token: String,
    /// Empty means every user may talk to the bot.
    pub telegram_allowed_users: Vec<i64>,

    // AI-assisted solutions
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,

    // Contest sessions
    pub clash: ClashConfig,
    pub interaction_timeout: Duration,
    pub create_cooldown: Duration,
}

/// Everything the clash subsystem needs, independent of the chat platform.
#[derive(Clone, Debug)]
pub struct ClashConfig {
    pub credentials: ClashCredentials,
    pub base_url: String,
    pub push_url: String,
    pub static_file_url: String,

    pub lobby_timeout: Duration,
    pub push_ack_timeout: Duration,
    pub http_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub prompt_test_cases: usize,
}

/// Remember-me cookie secret plus the user id embedded in it.
#[derive(Clone)]
pub struct ClashCredentials {
    pub remember_me: String,
    pub user_id: ContestUserId,
}

impl std::fmt::Debug for ClashCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClashCredentials")
            .field("remember_me", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl ClashCredentials {
    /// The service encodes the numeric user id in the first seven characters of
    /// the remember-me token.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        let prefix: String = secret.chars().take(7).collect();
        let user_id = prefix.parse::<u64>().map_err(|_| {
            Error::Config("CLASHOFCODE_KEY must start with the 7-digit user id".to_string())
        })?;
        Ok(Self {
            remember_me: secret.to_string(),
            user_id: ContestUserId(user_id),
        })
    }

    pub fn cookie(&self) -> String {
        format!("rememberMe={}", self.remember_me)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));

        let secret = env_str("CLASHOFCODE_KEY").and_then(non_empty).ok_or_else(|| {
            Error::Config("CLASHOFCODE_KEY environment variable is required".to_string())
        })?;
        let credentials = ClashCredentials::from_secret(&secret)?;

        let openai_api_key = env_str("OPENAI_API_KEY").and_then(non_empty);
        let openai_model = env_str("OPENAI_MODEL")
            .and_then(non_empty)
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        let openai_base_url = env_str("OPENAI_BASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let clash = ClashConfig {
            credentials,
            base_url: env_str("CODINGAME_URL")
                .and_then(non_empty)
                .unwrap_or_else(|| "https://www.codingame.com".to_string()),
            push_url: env_str("CODINGAME_PUSH_URL")
                .and_then(non_empty)
                .unwrap_or_else(|| "https://push-community.codingame.com".to_string()),
            static_file_url: env_str("CODINGAME_STATIC_URL")
                .and_then(non_empty)
                .unwrap_or_else(|| {
                    "https://static.codingame.com/servlet/fileservlet".to_string()
                }),
            lobby_timeout: env_non_zero_secs("CLASH_LOBBY_TIMEOUT_SECS", 300)?,
            push_ack_timeout: Duration::from_millis(
                env_u64("CLASH_PUSH_ACK_TIMEOUT_MS").unwrap_or(1500),
            ),
            http_timeout: Duration::from_secs(env_u64("CLASH_HTTP_TIMEOUT_SECS").unwrap_or(10)),
            reconnect_attempts: env_u32("CLASH_RECONNECT_ATTEMPTS").unwrap_or(5),
            reconnect_delay: Duration::from_millis(
                env_u64("CLASH_RECONNECT_DELAY_MS").unwrap_or(2000),
            ),
            prompt_test_cases: env_usize("CLASH_PROMPT_TEST_CASES").unwrap_or(3),
        };

        let interaction_timeout = env_non_zero_secs("CLASH_INTERACTION_TIMEOUT_SECS", 600)?;
        let create_cooldown =
            Duration::from_secs(env_u64("CLASH_CREATE_COOLDOWN_SECS").unwrap_or(15));

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            openai_api_key,
            openai_model,
            openai_base_url,
            clash,
            interaction_timeout,
            create_cooldown,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue;
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    let quoted = val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')));
    if quoted {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

/// Periods that drive timers; zero is refused rather than clamped.
fn env_non_zero_secs(key: &str, default: u64) -> Result<Duration> {
    match env_u64(key) {
        Some(0) => Err(Error::Config(format!("{key} must be greater than zero"))),
        secs => Ok(Duration::from_secs(secs.unwrap_or(default))),
    }
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
