use crate::{
    cli::commands::{api, identity},
    client::App,
    config::ClientConfig,
    identity::{GoTrueProvider, IdentityProvider, UnconfiguredProvider},
    surface::{LogNavigator, LogNotifier},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{path::PathBuf, sync::Arc, time::Duration};

/// Connection settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub backend_url: String,
    pub api_prefix: String,
    pub timeout: Duration,
    pub identity_url: Option<String>,
    pub identity_anon_key: SecretString,
    pub session_file: Option<PathBuf>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(api: api::Options, identity: Option<identity::Options>) -> Self {
        let (identity_url, identity_anon_key, session_file) = match identity {
            Some(options) => (Some(options.url), options.anon_key, options.session_file),
            None => (None, SecretString::default(), None),
        };

        Self {
            backend_url: api.backend_url,
            api_prefix: api.api_prefix,
            timeout: api.timeout,
            identity_url,
            identity_anon_key,
            session_file,
        }
    }

    /// # Errors
    /// Returns an error if the backend URL is invalid.
    pub fn client_config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig::new(&self.backend_url, &self.api_prefix)
            .context("invalid AUTHFLOW_BACKEND_URL")?
            .with_timeout(self.timeout))
    }

    /// The configured GoTrue provider, or `None` without an identity URL.
    ///
    /// # Errors
    /// Returns an error if the provider cannot be built.
    pub fn gotrue(&self) -> Result<Option<GoTrueProvider>> {
        let Some(url) = &self.identity_url else {
            return Ok(None);
        };

        let provider = GoTrueProvider::new(url, self.identity_anon_key.clone(), self.timeout)
            .context("invalid identity provider settings")?;
        Ok(Some(match &self.session_file {
            Some(path) => provider.with_session_file(path),
            None => provider,
        }))
    }

    /// Builds the application for a run of the CLI; `location` is the page
    /// the sign-in redirect should come back to.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn app(&self, location: &str) -> Result<App> {
        let provider: Arc<dyn IdentityProvider> = match self.gotrue()? {
            Some(provider) => Arc::new(provider),
            None => Arc::new(UnconfiguredProvider::new()),
        };

        Ok(App::new(
            self.client_config()?,
            provider,
            Arc::new(LogNotifier),
            Arc::new(LogNavigator::new(location)),
        )?)
    }
}
