/// Why a REST call to the contest service failed.
///
/// None of these are fatal: callers decide whether to retry, the session
/// orchestrator never does.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("{endpoint}: unexpected status {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint}: request failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },

    #[error("{endpoint}: malformed response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },

    #[error("{endpoint}: response is missing `{field}`")]
    MissingField {
        endpoint: &'static str,
        field: &'static str,
    },

    #[error("clash {0} not found")]
    NotFound(String),

    #[error("clash already started")]
    AlreadyStarted,
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("clash is not running")]
    NotRunning,

    #[error("language {0} is not allowed in this clash")]
    LanguageNotAllowed(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PushError {
    #[error("push connect failed: {0}")]
    Connect(String),

    #[error("push protocol error: {0}")]
    Protocol(String),

    #[error("push channel closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("clash {0} is already active")]
    AlreadyActive(String),
}
