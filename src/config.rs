//! Client configuration. The backend URL is normalised once here (trailing
//! slashes dropped, API prefix appended) so request paths can always be
//! joined the same way. Configuration values are public; tokens never live
//! here.

use crate::error::{Error, Result};
use std::time::Duration;
use url::Url;

/// Default request timeout applied to every API call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(15_000);
/// How long bootstrap waits on the identity provider before going anonymous.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const DEFAULT_SIGN_IN_PATH: &str = "/login";
pub const DEFAULT_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub timeout: Duration,
    pub init_timeout: Duration,
    pub sign_in_path: String,
    pub expired_message: String,
}

impl ClientConfig {
    /// Builds a config from a backend URL and an API prefix such as `/api`.
    ///
    /// # Errors
    /// Returns `Config` when the backend URL is empty, unparsable or not http(s).
    pub fn new(backend_url: &str, api_prefix: &str) -> Result<Self> {
        Ok(Self {
            api_base_url: normalize_base_url(backend_url, api_prefix)?,
            timeout: DEFAULT_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            expired_message: DEFAULT_EXPIRED_MESSAGE.to_string(),
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    /// Joins a request path onto the API base URL.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.api_base_url, path)
    }
}

fn normalize_base_url(backend_url: &str, api_prefix: &str) -> Result<String> {
    let raw = backend_url.trim();
    if raw.is_empty() {
        return Err(Error::Config("Backend URL is not configured.".to_string()));
    }

    let url = Url::parse(raw).map_err(|err| Error::Config(format!("Invalid backend URL: {err}")))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::Config(format!(
                "Unsupported backend URL scheme: {scheme}"
            )))
        }
    }

    Ok(join_url(raw, api_prefix))
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let path = path.trim().trim_start_matches('/');

    if path.is_empty() {
        base.to_string()
    } else if base.is_empty() {
        format!("/{path}")
    } else {
        format!("{base}/{path}")
    }
}
