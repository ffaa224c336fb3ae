//! Session data model: the credential, the principal it belongs to and the
//! lifecycle state of the store. Tokens are held in `SecretString` and only
//! ever leave it as an `Authorization` header value.

pub mod store;

pub use store::{SessionStore, Subscription};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque bearer token.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0.expose_secret())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Credential {}

/// The user a credential was issued to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Loading,
    Authenticated,
    Anonymous,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Authenticated => "authenticated",
            Self::Anonymous => "anonymous",
        }
    }

    /// True once bootstrap has settled.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Authenticated | Self::Anonymous)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed-in credential/principal pair as handed out by an identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthSession {
    pub credential: Credential,
    pub principal: Principal,
}

/// Snapshot of the store. `Authenticated` always carries both a credential
/// and a principal; every other state carries neither.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    credential: Option<Credential>,
    principal: Option<Principal>,
    state: SessionState,
}

impl Session {
    pub(crate) fn with_state(state: SessionState) -> Self {
        Self {
            credential: None,
            principal: None,
            state,
        }
    }

    pub(crate) fn authenticated(auth: AuthSession) -> Self {
        Self {
            credential: Some(auth.credential),
            principal: Some(auth.principal),
            state: SessionState::Authenticated,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }
}

/// Transitions pushed by the identity provider outside of any request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionChange {
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("super-secret");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.bearer(), "Bearer super-secret");
    }

    #[test]
    fn authenticated_session_carries_both_halves() {
        let session = Session::authenticated(AuthSession {
            credential: Credential::new("t"),
            principal: Principal {
                id: "user-1".to_string(),
                email: None,
            },
        });
        assert!(session.is_authenticated());
        assert!(session.credential().is_some());
        assert!(session.principal().is_some());

        let anonymous = Session::with_state(SessionState::Anonymous);
        assert!(!anonymous.is_authenticated());
        assert!(anonymous.credential().is_none());
        assert!(anonymous.principal().is_none());
    }

    #[test]
    fn principal_deserializes_without_email() -> Result<(), serde_json::Error> {
        let principal: Principal = serde_json::from_str(r#"{"id":"abc"}"#)?;
        assert_eq!(principal.id, "abc");
        assert_eq!(principal.email, None);
        Ok(())
    }
}
