use crate::error::{Error, Result};
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use ulid::Ulid;

/// Maximum number of error body characters surfaced to callers.
const MAX_ERROR_CHARS: usize = 200;

/// What to send: method, path relative to the API base, headers and body.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RequestSpec {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Encodes `body` as JSON and sets the content type.
    ///
    /// # Errors
    /// Returns `Serialization` if the body cannot be encoded.
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| Error::Serialization(format!("Failed to encode request: {err}")))?;
        Ok(self.header("Content-Type", "application/json").body(payload))
    }
}

/// One dispatch of a [`RequestSpec`] through the pipeline. The retry flag
/// can flip exactly once, which is what bounds refresh-and-replay to a
/// single attempt per request.
#[derive(Debug)]
pub struct PendingRequest {
    id: Ulid,
    spec: RequestSpec,
    retried: bool,
    generation: u64,
}

impl PendingRequest {
    pub(crate) fn new(spec: RequestSpec, generation: u64) -> Self {
        Self {
            id: Ulid::new(),
            spec,
            retried: false,
            generation,
        }
    }

    #[must_use]
    pub fn id(&self) -> Ulid {
        self.id
    }

    #[must_use]
    pub fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    #[must_use]
    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Session generation observed when the request was created.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Consumes the single retry. Returns `false` if it was already used.
    pub(crate) fn mark_retried(&mut self) -> bool {
        if self.retried {
            return false;
        }
        self.retried = true;
        true
    }
}

/// Response handed back to the caller untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    /// Returns `Parse` when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|err| Error::Parse(format!("Failed to decode response: {err}")))
    }

    /// Turns a non-2xx response into `Upstream` with a sanitized body.
    ///
    /// # Errors
    /// Returns `Upstream` for any non-success status.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Upstream {
                status: self.status,
                message: sanitize_body(&self.text()),
            })
        }
    }
}

/// Trims and truncates an error body for user-facing messages.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}
