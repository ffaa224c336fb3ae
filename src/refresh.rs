//! Single-flight credential refresh.
//!
//! Every request that sees a 401 calls [`CredentialRefresher::refresh`]. The
//! first caller starts one upstream refresh on its own task; everyone who
//! arrives while it is outstanding subscribes to the same `watch` channel and
//! is released by the single publication of its outcome. The slot is cleared
//! before publishing, so a 401 observed after settlement starts a new
//! operation instead of reusing a stale result.

use crate::{
    error::{Error, Result},
    session::{Credential, SessionStore},
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

type Outcome = Option<Result<Credential>>;

struct InFlight {
    id: u64,
    outcome: Arc<watch::Sender<Outcome>>,
}

pub struct CredentialRefresher {
    store: SessionStore,
    slot: Arc<Mutex<Option<InFlight>>>,
    next_id: AtomicU64,
}

impl CredentialRefresher {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns a fresh credential, joining the in-flight refresh if any.
    ///
    /// # Errors
    /// Returns `RefreshFailed` when the identity provider refuses or cannot
    /// be reached, or when the session changed under the refresh.
    pub async fn refresh(&self) -> Result<Credential> {
        let mut rx = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(in_flight) = slot.as_ref() {
                debug!(op = in_flight.id, "joining in-flight refresh");
                in_flight.outcome.subscribe()
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                let tx = Arc::new(tx);
                *slot = Some(InFlight {
                    id,
                    outcome: tx.clone(),
                });
                self.spawn_refresh(id, tx);
                rx
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => match outcome.as_ref() {
                Some(result) => result.clone(),
                None => Err(Error::RefreshFailed("refresh has no outcome".to_string())),
            },
            Err(_) => Err(Error::RefreshFailed(
                "refresh ended without an outcome".to_string(),
            )),
        };
        outcome
    }

    /// Callers currently waiting on the in-flight refresh (0 when idle).
    #[must_use]
    pub fn joined(&self) -> usize {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |in_flight| in_flight.outcome.receiver_count())
    }

    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn spawn_refresh(&self, id: u64, outcome: Arc<watch::Sender<Outcome>>) {
        let store = self.store.clone();
        let slot = self.slot.clone();
        let started_at = store.revision();
        let span = info_span!("session.refresh", op = id);

        tokio::spawn(
            async move {
                let result = store.provider().refresh_session().await;
                let settled = settle(&store, started_at, result);

                {
                    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
                        *slot = None;
                    }
                }

                debug!(
                    waiters = outcome.receiver_count(),
                    ok = settled.is_ok(),
                    "refresh settled"
                );
                outcome.send_replace(Some(settled));
            }
            .instrument(span),
        );
    }
}

/// Applies a refresh result to the store. If the session was changed by
/// someone else while the refresh was outstanding, that change wins and the
/// refreshed credential is discarded.
fn settle(
    store: &SessionStore,
    started_at: u64,
    result: Result<crate::session::AuthSession>,
) -> Result<Credential> {
    match result {
        Ok(auth) => {
            if store.revision() != started_at {
                return match store.credential() {
                    Some(credential) => {
                        info!("session changed during refresh, using the current credential");
                        Ok(credential)
                    }
                    None => {
                        warn!("session ended during refresh, discarding refreshed credential");
                        Err(Error::RefreshFailed(
                            "session ended while refreshing".to_string(),
                        ))
                    }
                };
            }

            let credential = auth.credential.clone();
            store.set_authenticated(auth);
            info!("credential refreshed");
            Ok(credential)
        }
        Err(err) => {
            warn!("Failed to refresh credential: {}", err);
            Err(match err {
                Error::RefreshFailed(reason) => Error::RefreshFailed(reason),
                other => Error::RefreshFailed(other.to_string()),
            })
        }
    }
}
