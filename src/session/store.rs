//! Single source of truth for "are we authenticated, and with what".
//!
//! The session lives in a `tokio::sync::watch` channel so reads are
//! synchronous and bootstrap waiters can await the end of `Loading`. Provider
//! change notifications are pumped into the store by a background task that
//! only holds a weak reference, so tearing the store down (or dropping it)
//! ends the pump.

use super::{AuthSession, Credential, Session, SessionChange, SessionState};
use crate::identity::IdentityProvider;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError, Weak},
};
use tokio::{
    sync::broadcast::error::RecvError,
    task::JoinHandle,
    time::{timeout, Duration},
};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

type Listener = Arc<dyn Fn(&Session) + Send + Sync>;

#[derive(Clone, Debug, Default)]
struct StoreState {
    session: Session,
    generation: u64,
    revision: u64,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    init_timeout: Duration,
    state: tokio::sync::watch::Sender<StoreState>,
    listeners: Arc<Mutex<Listeners>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the shared session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

/// Handle returned by [`SessionStore::subscribe`]. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .remove(&self.id);
        }
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>, init_timeout: Duration) -> Self {
        let (state, _) = tokio::sync::watch::channel(StoreState::default());
        Self {
            inner: Arc::new(Inner {
                provider,
                init_timeout,
                state,
                listeners: Arc::new(Mutex::new(Listeners::default())),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Resolves the initial session. Only the first call starts the
    /// bootstrap; every call waits for the store to leave `Loading`.
    ///
    /// The provider is queried on its own task, so dropping this future does
    /// not leave the store stuck in `Loading`.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Session {
        let claimed = self.inner.state.send_if_modified(|state| {
            if state.session.state() == SessionState::Uninitialized {
                state.session = Session::with_state(SessionState::Loading);
                state.revision += 1;
                true
            } else {
                false
            }
        });

        if claimed {
            // Subscribe before querying so a change racing the query is not lost.
            self.start_pump();
            self.spawn_bootstrap();
        } else {
            debug!("session bootstrap already started, waiting for it");
        }

        self.wait_until_resolved().await
    }

    fn spawn_bootstrap(&self) {
        let store = self.clone();
        let span = info_span!("session.bootstrap");

        tokio::spawn(
            async move {
                let resolved = match timeout(
                    store.inner.init_timeout,
                    store.inner.provider.current_session(),
                )
                .await
                {
                    Ok(Ok(Some(auth))) => Session::authenticated(auth),
                    Ok(Ok(None)) => Session::with_state(SessionState::Anonymous),
                    Ok(Err(err)) => {
                        warn!("Identity provider unavailable, continuing anonymously: {}", err);
                        Session::with_state(SessionState::Anonymous)
                    }
                    Err(_) => {
                        warn!(
                            timeout_ms = store.inner.init_timeout.as_millis(),
                            "Identity provider did not answer, continuing anonymously"
                        );
                        Session::with_state(SessionState::Anonymous)
                    }
                };

                store.resolve_bootstrap(resolved);
                info!(state = %store.state(), "session initialized");
            }
            .instrument(span),
        );
    }

    /// Awaits the end of bootstrap and returns the settled session.
    pub async fn wait_until_resolved(&self) -> Session {
        let mut rx = self.inner.state.subscribe();
        let resolved = match rx.wait_for(|state| state.session.state().is_resolved()).await {
            Ok(state) => Some(state.session.clone()),
            // The sender lives in `inner`, which we hold.
            Err(_) => None,
        };
        resolved.unwrap_or_else(|| self.session())
    }

    /// Registers `listener` for every subsequent session transition.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(listener));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    /// Current credential when authenticated. Never waits.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        let state = self.inner.state.borrow();
        if state.session.is_authenticated() {
            state.session.credential().cloned()
        } else {
            None
        }
    }

    #[must_use]
    pub fn session(&self) -> Session {
        self.inner.state.borrow().session.clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().session.state()
    }

    /// Login lifetime counter; bumps on every entry into `Authenticated`
    /// from another state.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.state.borrow().generation
    }

    /// Mutation counter; bumps on every change of the session.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.state.borrow().revision
    }

    pub(crate) fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.inner.provider
    }

    pub(crate) fn set_authenticated(&self, auth: AuthSession) {
        self.apply(Session::authenticated(auth));
    }

    pub(crate) fn set_anonymous(&self) {
        self.apply(Session::with_state(SessionState::Anonymous));
    }

    /// Stops the provider pump and drops every listener.
    pub fn teardown(&self) {
        if let Some(handle) = self
            .inner
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
        debug!("session store torn down");
    }

    fn apply(&self, next: Session) {
        let changed = self.inner.state.send_if_modified(|state| {
            if state.session == next {
                return false;
            }
            if next.is_authenticated() && !state.session.is_authenticated() {
                state.generation += 1;
            }
            state.revision += 1;
            state.session = next;
            true
        });

        if changed {
            self.notify_listeners();
        }
    }

    /// Applies the bootstrap result only while the store is still `Loading`.
    /// A provider change that resolved the store first wins.
    fn resolve_bootstrap(&self, resolved: Session) {
        let changed = self.inner.state.send_if_modified(|state| {
            if state.session.state() != SessionState::Loading {
                return false;
            }
            if resolved.is_authenticated() {
                state.generation += 1;
            }
            state.revision += 1;
            state.session = resolved;
            true
        });

        if changed {
            self.notify_listeners();
        } else {
            debug!("session resolved by a provider change, bootstrap result dropped");
        }
    }

    fn notify_listeners(&self) {
        let session = self.session();
        // Call outside the lock so listeners may (un)subscribe.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .cloned()
            .collect();

        debug!(
            state = %session.state(),
            listeners = listeners.len(),
            "session transition"
        );

        for listener in listeners {
            listener(&session);
        }
    }

    fn start_pump(&self) {
        let mut changes = self.inner.provider.subscribe();
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session change listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let store = SessionStore { inner };

                match change {
                    SessionChange::SignedIn(auth) | SessionChange::TokenRefreshed(auth) => {
                        store.set_authenticated(auth);
                    }
                    SessionChange::SignedOut => store.set_anonymous(),
                }
            }
        });

        if let Some(previous) = self
            .inner
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("SessionStore")
            .field("state", &state.session.state())
            .field("generation", &state.generation)
            .field("revision", &state.revision)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        error::{Error, Result},
        identity::{IdentityProvider, CHANGE_CHANNEL_CAPACITY},
        session::Principal,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{broadcast, Notify};

    struct FakeProvider {
        session: Option<AuthSession>,
        fail: bool,
        hang: bool,
        gate: Notify,
        calls: AtomicUsize,
        changes: broadcast::Sender<SessionChange>,
    }

    impl FakeProvider {
        fn new(session: Option<AuthSession>) -> Self {
            let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
            Self {
                session,
                fail: false,
                hang: false,
                gate: Notify::new(),
                calls: AtomicUsize::new(0),
                changes,
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn current_session(&self) -> Result<Option<AuthSession>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.gate.notified().await;
            if self.fail {
                return Err(Error::Network("unreachable".to_string()));
            }
            Ok(self.session.clone())
        }

        async fn refresh_session(&self) -> Result<AuthSession> {
            Err(Error::RefreshFailed("not used".to_string()))
        }

        fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
            self.changes.subscribe()
        }

        async fn sign_out(&self) -> Result<()> {
            Ok(())
        }
    }

    fn auth(token: &str) -> AuthSession {
        AuthSession {
            credential: Credential::new(token),
            principal: Principal {
                id: "user-1".to_string(),
                email: Some("user@example.com".to_string()),
            },
        }
    }

    fn store_with(provider: Arc<FakeProvider>) -> SessionStore {
        SessionStore::new(provider, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn concurrent_initialize_queries_provider_once() {
        let provider = Arc::new(FakeProvider::new(Some(auth("token-1"))));
        let store = store_with(provider.clone());

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.initialize().await }
        });
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.initialize().await }
        });

        while store.state() != SessionState::Loading {
            tokio::task::yield_now().await;
        }
        assert!(store.credential().is_none());
        provider.gate.notify_one();

        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.state(), SessionState::Authenticated);
        assert_eq!(first, second);
        assert_eq!(store.credential(), Some(Credential::new("token-1")));
        assert_eq!(store.generation(), 1);
    }

    #[tokio::test]
    async fn unreachable_provider_settles_anonymous() {
        let mut provider = FakeProvider::new(Some(auth("token-1")));
        provider.fail = true;
        let provider = Arc::new(provider);
        provider.gate.notify_one();

        let store = store_with(provider);
        let session = store.initialize().await;

        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(store.credential().is_none());
    }

    #[tokio::test]
    async fn hanging_provider_settles_anonymous_after_timeout() {
        let mut provider = FakeProvider::new(Some(auth("token-1")));
        provider.hang = true;
        let store = store_with(Arc::new(provider));

        let session = store.initialize().await;
        assert_eq!(session.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn abandoned_initialize_still_resolves() {
        let provider = Arc::new(FakeProvider::new(Some(auth("token-1"))));
        let store = SessionStore::new(provider.clone(), Duration::from_millis(100));

        assert!(timeout(Duration::from_millis(10), store.initialize())
            .await
            .is_err());
        assert_eq!(store.state(), SessionState::Loading);

        let session = timeout(Duration::from_secs(2), store.initialize())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Anonymous);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sign_in_during_bootstrap_beats_the_bootstrap_result() {
        let provider = Arc::new(FakeProvider::new(None));
        let store = store_with(provider.clone());

        let init = tokio::spawn({
            let store = store.clone();
            async move { store.initialize().await }
        });
        while provider.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        provider
            .changes
            .send(SessionChange::SignedIn(auth("token-2")))
            .unwrap();
        let session = init.await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        let revision = store.revision();

        // The bootstrap answer (no session) arrives late and is dropped.
        provider.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.state(), SessionState::Authenticated);
        assert_eq!(store.credential(), Some(Credential::new("token-2")));
        assert_eq!(store.generation(), 1);
        assert_eq!(store.revision(), revision);
    }

    #[tokio::test]
    async fn provider_changes_reach_listeners() {
        let provider = Arc::new(FakeProvider::new(Some(auth("token-1"))));
        provider.gate.notify_one();
        let store = store_with(provider.clone());
        store.initialize().await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _subscription = store.subscribe(move |session| {
            let _ = tx.send(session.state());
        });

        provider.changes.send(SessionChange::SignedOut).unwrap();
        assert_eq!(rx.recv().await, Some(SessionState::Anonymous));
        assert!(store.credential().is_none());

        provider
            .changes
            .send(SessionChange::SignedIn(auth("token-2")))
            .unwrap();
        assert_eq!(rx.recv().await, Some(SessionState::Authenticated));
        assert_eq!(store.credential(), Some(Credential::new("token-2")));
        assert_eq!(store.generation(), 2);
    }

    #[tokio::test]
    async fn token_rotation_keeps_generation() {
        let provider = Arc::new(FakeProvider::new(Some(auth("token-1"))));
        provider.gate.notify_one();
        let store = store_with(provider);
        store.initialize().await;
        let revision = store.revision();

        store.set_authenticated(auth("token-2"));

        assert_eq!(store.generation(), 1);
        assert!(store.revision() > revision);

        // Same session again is not a transition.
        let revision = store.revision();
        store.set_authenticated(auth("token-2"));
        assert_eq!(store.revision(), revision);
    }

    #[tokio::test]
    async fn dropped_subscription_stops_notifications() {
        let provider = Arc::new(FakeProvider::new(None));
        provider.gate.notify_one();
        let store = store_with(provider);
        store.initialize().await;

        let hits = Arc::new(AtomicUsize::new(0));
        let subscription = store.subscribe({
            let hits = hits.clone();
            move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });

        store.set_authenticated(auth("token-1"));
        subscription.unsubscribe();
        store.set_anonymous();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_after_teardown_is_a_noop() {
        let provider = Arc::new(FakeProvider::new(None));
        provider.gate.notify_one();
        let store = store_with(provider);
        store.initialize().await;

        let subscription = store.subscribe(|_| {});
        store.teardown();
        subscription.unsubscribe();

        let subscription = store.subscribe(|_| {});
        drop(store);
        drop(subscription);
    }
}
