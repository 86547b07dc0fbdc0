use thiserror::Error;

pub type Result<T, E = ScoutError> = std::result::Result<T, E>;

/// Failure taxonomy for the crawl pipeline.
///
/// `FetchFailed` and `ChallengeUnresolved` abort the current cycle and reach
/// the crash branch of the run loop. `Store` and `Notify` are handled where
/// they occur: lookups degrade, writes and routine notifications are logged.
#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("navigation to {url} failed after {attempts} attempts: {reason}")]
    FetchFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("challenge page could not be resolved: {0}")]
    ChallengeUnresolved(String),

    #[error("store operation failed: {0}")]
    Store(String),

    #[error("notification could not be sent: {0}")]
    Notify(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<sqlx::Error> for ScoutError {
    fn from(err: sqlx::Error) -> Self {
        ScoutError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for ScoutError {
    fn from(err: reqwest::Error) -> Self {
        ScoutError::Notify(err.to_string())
    }
}
