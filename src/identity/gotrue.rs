//! GoTrue-compatible identity provider (the auth service behind Supabase).
//!
//! The provider keeps the signed-in session in memory and, when a session
//! file is configured, mirrors it to disk so a later process can pick it up.
//! Tokens stay in `SecretString` in memory; the file is written owner-only.

use super::{IdentityProvider, CHANGE_CHANNEL_CAPACITY};
use crate::{
    error::{Error, Result},
    session::{AuthSession, Credential, Principal, SessionChange},
    APP_USER_AGENT,
};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{path::PathBuf, time::Duration};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

const API_KEY_HEADER: &str = "apikey";
const MAX_ERROR_CHARS: usize = 200;

struct Held {
    credential: Credential,
    refresh_token: SecretString,
    principal: Principal,
    expires_at: Option<u64>,
}

impl Held {
    fn auth_session(&self) -> AuthSession {
        AuthSession {
            credential: self.credential.clone(),
            principal: self.principal.clone(),
        }
    }
}

/// On-disk form of [`Held`].
#[derive(Serialize, Deserialize)]
struct PersistedSession {
    access_token: String,
    refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
    user: Principal,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<u64>,
    user: Principal,
}

pub struct GoTrueProvider {
    client: Client,
    base_url: String,
    anon_key: SecretString,
    session_file: Option<PathBuf>,
    held: RwLock<Option<Held>>,
    changes: broadcast::Sender<SessionChange>,
}

impl GoTrueProvider {
    /// # Errors
    /// Returns `Config` if the URL or anon key is empty or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, anon_key: SecretString, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config(
                "Identity provider URL is not configured.".to_string(),
            ));
        }
        if anon_key.expose_secret().trim().is_empty() {
            return Err(Error::Config(
                "Identity provider anon key is not configured.".to_string(),
            ));
        }

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Config(format!("Failed to build HTTP client: {err}")))?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url,
            anon_key,
            session_file: None,
            held: RwLock::new(None),
            changes,
        })
    }

    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Signs in with email and password and keeps the resulting session.
    ///
    /// # Errors
    /// `Upstream` when the credentials are rejected, transport errors otherwise.
    #[instrument(skip(self, password))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthSession> {
        let body = json!({
            "email": email,
            "password": password.expose_secret(),
        });
        let response = self.token_request("password", &body).await?;
        let held = parse_token_response(response)
            .await
            .map_err(|err| match err {
                Error::RefreshFailed(message) => Error::Upstream {
                    status: 400,
                    message,
                },
                other => other,
            })?;

        let auth = held.auth_session();
        self.store(held).await;
        info!(user = %auth.principal.id, "signed in");
        let _ = self.changes.send(SessionChange::SignedIn(auth.clone()));
        Ok(auth)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn token_request(&self, grant_type: &str, body: &Value) -> Result<Response> {
        let url = self.endpoint(&format!("token?grant_type={grant_type}"));
        let span = info_span!("identity.token", http.method = "POST", grant_type);

        Ok(self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.anon_key.expose_secret())
            .json(body)
            .send()
            .instrument(span)
            .await?)
    }

    async fn store(&self, held: Held) {
        if let Err(err) = self.persist(&held).await {
            warn!("Failed to persist session: {}", err);
        }
        *self.held.write().await = Some(held);
    }

    async fn persist(&self, held: &Held) -> Result<()> {
        let Some(path) = &self.session_file else {
            return Ok(());
        };

        let persisted = PersistedSession {
            access_token: held.credential.expose().to_string(),
            refresh_token: held.refresh_token.expose_secret().to_string(),
            expires_at: held.expires_at,
            user: held.principal.clone(),
        };
        let payload = serde_json::to_vec_pretty(&persisted)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::Config(format!("Failed to create {parent:?}: {err}")))?;
        }
        tokio::fs::write(path, payload)
            .await
            .map_err(|err| Error::Config(format!("Failed to write {path:?}: {err}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|err| Error::Config(format!("Failed to restrict {path:?}: {err}")))?;
        }

        debug!(path = ?path, "session persisted");
        Ok(())
    }

    async fn load_persisted(&self) -> Result<Option<Held>> {
        let Some(path) = &self.session_file else {
            return Ok(None);
        };

        let payload = match tokio::fs::read(path).await {
            Ok(payload) => payload,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::Config(format!("Failed to read {path:?}: {err}")));
            }
        };

        let persisted: PersistedSession = serde_json::from_slice(&payload)?;
        Ok(Some(Held {
            credential: Credential::new(persisted.access_token),
            refresh_token: SecretString::from(persisted.refresh_token),
            principal: persisted.user,
            expires_at: persisted.expires_at,
        }))
    }

    async fn forget(&self) -> Option<Held> {
        let held = self.held.write().await.take();
        if let Some(path) = &self.session_file {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = ?path, "session file removed"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to remove session file: {}", err),
            }
        }
        held
    }
}

#[async_trait]
impl IdentityProvider for GoTrueProvider {
    async fn current_session(&self) -> Result<Option<AuthSession>> {
        if let Some(held) = self.held.read().await.as_ref() {
            return Ok(Some(held.auth_session()));
        }

        let Some(held) = self.load_persisted().await? else {
            return Ok(None);
        };
        let auth = held.auth_session();
        *self.held.write().await = Some(held);
        debug!(user = %auth.principal.id, "session restored from disk");
        Ok(Some(auth))
    }

    #[instrument(skip(self))]
    async fn refresh_session(&self) -> Result<AuthSession> {
        let refresh_token = match self.held.read().await.as_ref() {
            Some(held) => held.refresh_token.expose_secret().to_string(),
            None => return Err(Error::CredentialAbsent),
        };

        let response = self
            .token_request("refresh_token", &json!({ "refresh_token": refresh_token }))
            .await?;
        let held = parse_token_response(response).await?;

        let auth = held.auth_session();
        self.store(held).await;
        let _ = self.changes.send(SessionChange::TokenRefreshed(auth.clone()));
        Ok(auth)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<()> {
        let Some(held) = self.forget().await else {
            return Ok(());
        };
        let _ = self.changes.send(SessionChange::SignedOut);

        let span = info_span!("identity.logout", http.method = "POST");
        let response = self
            .client
            .post(self.endpoint("logout"))
            .header(API_KEY_HEADER, self.anon_key.expose_secret())
            .header(AUTHORIZATION, held.credential.bearer())
            .send()
            .instrument(span)
            .await?;

        // The token may already be dead; the local session is gone either way.
        let status = response.status();
        if status.is_success() || status.as_u16() == 401 {
            info!("signed out");
            Ok(())
        } else {
            let message = error_message(response).await;
            Err(Error::Upstream {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Reads a token grant response; any non-success status means the
/// identity provider refused the grant.
async fn parse_token_response(response: Response) -> Result<Held> {
    let status = response.status();
    if !status.is_success() {
        let message = error_message(response).await;
        return Err(Error::RefreshFailed(format!("{status}: {message}")));
    }

    let token: TokenResponse = response.json().await?;
    Ok(Held {
        credential: Credential::new(token.access_token),
        refresh_token: SecretString::from(token.refresh_token),
        principal: token.user,
        expires_at: token.expires_at,
    })
}

async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    let from_json = serde_json::from_str::<Value>(&body).ok().and_then(|value| {
        ["error_description", "msg", "message", "error"]
            .iter()
            .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_string))
    });

    let message = from_json.unwrap_or(body);
    let trimmed = message.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn token_body(access: &str, refresh: &str) -> Value {
        json!({
            "access_token": access,
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1_900_000_000u64,
            "refresh_token": refresh,
            "user": { "id": "user-1", "email": "ada@example.com", "role": "authenticated" }
        })
    }

    fn provider(server: &MockServer) -> GoTrueProvider {
        GoTrueProvider::new(
            &server.uri(),
            SecretString::from("anon-key".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn temp_session_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("authflow-{name}-{}.json", ulid::Ulid::new()))
    }

    #[test]
    fn rejects_missing_configuration() {
        let key = SecretString::from("anon".to_string());
        assert!(matches!(
            GoTrueProvider::new(" ", key, Duration::from_secs(1)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            GoTrueProvider::new(
                "https://id.example.com",
                SecretString::from(String::new()),
                Duration::from_secs(1)
            ),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn sign_in_then_refresh_rotates_tokens() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .and(body_json(json!({ "email": "ada@example.com", "password": "hunter2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_json(json!({ "refresh_token": "r1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        let mut changes = provider.subscribe();

        let auth = provider
            .sign_in_with_password("ada@example.com", &SecretString::from("hunter2".to_string()))
            .await?;
        assert_eq!(auth.credential, Credential::new("a1"));
        assert_eq!(auth.principal.email.as_deref(), Some("ada@example.com"));
        assert!(matches!(changes.recv().await?, SessionChange::SignedIn(_)));

        let refreshed = provider.refresh_session().await?;
        assert_eq!(refreshed.credential, Credential::new("a2"));
        assert!(matches!(
            changes.recv().await?,
            SessionChange::TokenRefreshed(_)
        ));

        let Some(current) = provider.current_session().await? else {
            bail!("expected a current session");
        };
        assert_eq!(current.credential, Credential::new("a2"));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_without_session_is_credential_absent() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let provider = provider(&server);

        assert_eq!(provider.refresh_session().await, Err(Error::CredentialAbsent));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_refresh_surfaces_provider_message() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid Refresh Token: Already Used"
            })))
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider
            .sign_in_with_password("ada@example.com", &SecretString::from("pw".to_string()))
            .await?;

        match provider.refresh_session().await {
            Err(Error::RefreshFailed(message)) => {
                assert!(message.contains("Invalid Refresh Token: Already Used"));
            }
            other => bail!("expected refresh failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn session_file_survives_a_new_provider() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("Authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let file = temp_session_file("persist");
        let first = provider(&server).with_session_file(&file);
        first
            .sign_in_with_password("ada@example.com", &SecretString::from("pw".to_string()))
            .await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&file)?.permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let second = provider(&server).with_session_file(&file);
        let Some(restored) = second.current_session().await? else {
            bail!("expected the session to be restored from disk");
        };
        assert_eq!(restored.credential, Credential::new("a1"));
        assert_eq!(restored.principal.id, "user-1");

        second.sign_out().await?;
        assert!(!file.exists());
        assert!(second.current_session().await?.is_none());
        Ok(())
    }
}
