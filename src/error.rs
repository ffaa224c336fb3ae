//! Error taxonomy shared by the session store, the refresher and the request
//! pipeline. Errors are `Clone` so a single refresh outcome can be handed to
//! every request that joined it.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// No session is available; requests go out unauthenticated.
    #[error("no credential available")]
    CredentialAbsent,
    /// The remote API answered 401. Handled inside the pipeline.
    #[error("credential expired")]
    CredentialExpired,
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
    /// Terminal: the retry was already used or the refresh failed.
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("request failed ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("response error: {0}")]
    Parse(String),
    #[error("request error: {0}")]
    Serialization(String),
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors after which the pipeline stops trying.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout("Request timed out. Please try again.".to_string())
        } else if err.is_decode() {
            Self::Parse(format!("Failed to decode response: {err}"))
        } else if err.is_builder() {
            Self::Serialization(format!("Failed to build request: {err}"))
        } else {
            Self::Network(format!("Unable to reach the server: {err}"))
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(format!("Invalid JSON: {err}"))
    }
}
