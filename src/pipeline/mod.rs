//! Authenticated request pipeline.
//!
//! Per request:
//!
//! 1. wait for the session bootstrap, attach the store's credential (or
//!    none) and send;
//! 2. any status but 401 goes back to the caller unchanged;
//! 3. on the first 401, join or start the single-flight refresh, consume the
//!    request's one retry and resend with the refreshed credential;
//! 4. a 401 after the retry, or a failed refresh, reports the session loss
//!    to the sign-out coordinator and ends in `Unauthenticated`. The loss is
//!    reported for the session current at the 401, not the one the request
//!    was created under.

pub mod request;
pub mod transport;

pub use request::{ApiResponse, PendingRequest, RequestSpec};
pub use transport::{HttpTransport, Transport};

use crate::{
    error::{Error, Result},
    refresh::CredentialRefresher,
    session::{Credential, SessionStore},
    signout::SignOutCoordinator,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

const UNAUTHORIZED: u16 = 401;

#[derive(Clone)]
pub struct AuthenticatedClient {
    store: SessionStore,
    refresher: Arc<CredentialRefresher>,
    signout: Arc<SignOutCoordinator>,
    transport: Arc<dyn Transport>,
}

impl AuthenticatedClient {
    #[must_use]
    pub fn new(
        store: SessionStore,
        refresher: Arc<CredentialRefresher>,
        signout: Arc<SignOutCoordinator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            refresher,
            signout,
            transport,
        }
    }

    #[must_use]
    pub fn refresher(&self) -> &Arc<CredentialRefresher> {
        &self.refresher
    }

    /// Sends `spec`, refreshing and replaying once on 401.
    ///
    /// # Errors
    /// `Unauthenticated` when the session cannot be recovered; transport
    /// errors (`Network`, `Timeout`) as they occur. Non-401 statuses are not
    /// errors here.
    pub async fn send(&self, spec: RequestSpec) -> Result<ApiResponse> {
        // Starts the bootstrap if nobody did; otherwise waits for it.
        self.store.initialize().await;
        let pending = PendingRequest::new(spec, self.store.generation());
        self.run(pending).await
    }

    /// `GET` a JSON document.
    ///
    /// # Errors
    /// As [`send`](Self::send), plus `Upstream` for non-2xx and `Parse` for
    /// undecodable bodies.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(RequestSpec::get(path))
            .await?
            .error_for_status()?
            .json()
    }

    /// `POST` a JSON body and decode the JSON answer.
    ///
    /// # Errors
    /// As [`get_json`](Self::get_json), plus `Serialization` when the body
    /// cannot be encoded.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(RequestSpec::post(path).json(body)?)
            .await?
            .error_for_status()?
            .json()
    }

    pub(crate) async fn run(&self, mut pending: PendingRequest) -> Result<ApiResponse> {
        let span = info_span!(
            "api.pending",
            request_id = %pending.id(),
            http.method = %pending.spec().method,
            path = %pending.spec().path,
            generation = pending.generation()
        );

        async move {
            let mut credential = self.store.credential();

            loop {
                let outcome = self.dispatch(&pending, credential.as_ref()).await;
                match outcome {
                    Err(Error::CredentialExpired) if !pending.retried() => {
                        debug!("credential rejected, refreshing");
                        let generation = self.store.generation();
                        match self.refresher.refresh().await {
                            Ok(fresh) => {
                                pending.mark_retried();
                                credential = Some(fresh);
                            }
                            Err(err) => {
                                warn!("Unable to recover session: {}", err);
                                return Err(self.fail(generation).await);
                            }
                        }
                    }
                    Err(Error::CredentialExpired) => {
                        warn!("refreshed credential rejected");
                        return Err(self.fail(self.store.generation()).await);
                    }
                    outcome => return outcome,
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        pending: &PendingRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse> {
        let response = self.transport.execute(pending, credential).await?;
        if response.status == UNAUTHORIZED {
            Err(Error::CredentialExpired)
        } else {
            Ok(response)
        }
    }

    async fn fail(&self, generation: u64) -> Error {
        self.signout.report_unauthenticated(generation).await;
        Error::Unauthenticated
    }
}
