//! Global sign-out: the one externally visible "you have been logged out"
//! transition. It is keyed by the store generation, so every request that
//! fails for the same lost session collapses into a single clear + notify +
//! redirect, and a later login re-arms it.

use crate::{
    guard::sign_in_link,
    session::SessionStore,
    surface::{NavigateOptions, Navigator, Notifier, Severity},
};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};

pub struct SignOutCoordinator {
    store: SessionStore,
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
    sign_in_path: String,
    message: String,
    signed_out: Mutex<Option<u64>>,
}

impl SignOutCoordinator {
    #[must_use]
    pub fn new(
        store: SessionStore,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
        sign_in_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            navigator,
            sign_in_path: sign_in_path.into(),
            message: message.into(),
            signed_out: Mutex::new(None),
        }
    }

    /// Reports that a request dispatched during `generation` ended
    /// unauthenticated. Returns `true` for the call that ran the sign-out.
    #[instrument(skip(self))]
    pub async fn report_unauthenticated(&self, generation: u64) -> bool {
        let current = self.store.generation();
        if generation < current {
            debug!(current, "ignoring report from an earlier session");
            return false;
        }

        {
            let mut signed_out = self
                .signed_out
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *signed_out == Some(current) {
                debug!("sign-out already handled for this session");
                return false;
            }
            *signed_out = Some(current);
        }

        self.store.set_anonymous();
        self.notifier.notify(&self.message, Severity::Warning);

        let location = self.navigator.current_location();
        let target = sign_in_link(&self.sign_in_path, &location);
        self.navigator
            .navigate_to(&target, NavigateOptions { replace: true });

        info!(generation = current, redirect = %target, "session expired, signed out");

        if self.store.generation() != current {
            debug!("a new session started while signing out, keeping it");
            return true;
        }
        if let Err(err) = self.store.provider().sign_out().await {
            warn!("Failed to sign out from identity provider: {}", err);
        }

        true
    }

    /// Generation of the most recent sign-out, if any.
    #[must_use]
    pub fn last_signed_out(&self) -> Option<u64> {
        *self
            .signed_out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
