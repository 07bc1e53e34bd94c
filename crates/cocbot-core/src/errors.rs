/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the bot core can
/// handle failures consistently (user-facing message vs retryable).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    #[error(transparent)]
    Api(#[from] crate::clash::ApiError),

    #[error(transparent)]
    Session(#[from] crate::clash::SessionError),
}

pub type Result<T> = std::result::Result<T, Error>;
