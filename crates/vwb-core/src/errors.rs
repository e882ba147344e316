/// Core error type.
///
/// Adapter crates map their specific errors into this type so the pipeline and
/// the conversation handlers can treat failures consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("external error: {0}")]
    External(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::Upstream(format!("request timed out: {e}"));
        }
        Error::Upstream(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
