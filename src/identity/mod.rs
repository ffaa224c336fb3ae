//! Identity provider boundary. The provider issues credentials, rotates them
//! and announces sign-in/sign-out happening outside of this process. The
//! store, the refresher and the sign-out coordinator only talk to it through
//! [`IdentityProvider`].

pub mod gotrue;

pub use gotrue::GoTrueProvider;

use crate::{
    error::{Error, Result},
    session::{AuthSession, SessionChange},
};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Capacity of provider change channels. Slow subscribers lose the oldest
/// events and resynchronise from the next one.
pub const CHANGE_CHANNEL_CAPACITY: usize = 16;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the session the provider already holds, if any.
    async fn current_session(&self) -> Result<Option<AuthSession>>;

    /// Exchanges the held refresh material for a new credential.
    async fn refresh_session(&self) -> Result<AuthSession>;

    /// Receiver for transitions the provider observes on its own.
    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;

    /// Drops the provider-side session.
    async fn sign_out(&self) -> Result<()>;
}

/// Provider used when no identity service is configured: every request goes
/// out anonymously and refreshing is impossible.
#[derive(Debug)]
pub struct UnconfiguredProvider {
    changes: broadcast::Sender<SessionChange>,
}

impl UnconfiguredProvider {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1);
        Self { changes }
    }
}

impl Default for UnconfiguredProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for UnconfiguredProvider {
    async fn current_session(&self) -> Result<Option<AuthSession>> {
        Ok(None)
    }

    async fn refresh_session(&self) -> Result<AuthSession> {
        Err(Error::Config(
            "Identity provider is not configured.".to_string(),
        ))
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    async fn sign_out(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_provider_is_anonymous() {
        let provider = UnconfiguredProvider::new();
        assert!(matches!(provider.current_session().await, Ok(None)));
        assert!(matches!(
            provider.refresh_session().await,
            Err(Error::Config(_))
        ));
        assert!(provider.sign_out().await.is_ok());
    }
}
