//! Wiring for one application instance: a store, a refresher, a sign-out
//! coordinator and a pipeline that share the same session.

use crate::{
    config::ClientConfig,
    error::Result,
    guard::{self, GuardDecision},
    identity::IdentityProvider,
    pipeline::{AuthenticatedClient, HttpTransport, Transport},
    refresh::CredentialRefresher,
    session::{Session, SessionStore},
    signout::SignOutCoordinator,
    surface::{Navigator, Notifier},
};
use std::sync::Arc;

pub struct App {
    config: ClientConfig,
    store: SessionStore,
    client: AuthenticatedClient,
}

impl App {
    /// Builds the application with the HTTP transport.
    ///
    /// # Errors
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(
        config: ClientConfig,
        provider: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let transport = HttpTransport::new(config.clone())?;
        Ok(Self::with_transport(
            config,
            provider,
            notifier,
            navigator,
            Arc::new(transport),
        ))
    }

    #[must_use]
    pub fn with_transport(
        config: ClientConfig,
        provider: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let store = SessionStore::new(provider, config.init_timeout);
        let refresher = Arc::new(CredentialRefresher::new(store.clone()));
        let signout = Arc::new(SignOutCoordinator::new(
            store.clone(),
            notifier,
            navigator,
            config.sign_in_path.clone(),
            config.expired_message.clone(),
        ));
        let client = AuthenticatedClient::new(store.clone(), refresher, signout, transport);

        Self {
            config,
            store,
            client,
        }
    }

    /// Resolves the initial session; see [`SessionStore::initialize`].
    pub async fn initialize(&self) -> Session {
        self.store.initialize().await
    }

    pub fn teardown(&self) {
        self.store.teardown();
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Guard decision for a protected page at `location`.
    #[must_use]
    pub fn guard(&self, location: &str) -> GuardDecision {
        guard::check(&self.store, &self.config.sign_in_path, location)
    }
}
