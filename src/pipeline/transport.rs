//! Wire transport for the pipeline. The pipeline only needs "send this
//! request with (or without) this credential and give me status, headers and
//! body", so the HTTP client sits behind [`Transport`].

use super::request::{ApiResponse, PendingRequest};
use crate::{
    config::ClientConfig,
    error::{Error, Result},
    session::Credential,
    APP_USER_AGENT,
};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use tracing::{debug, info_span, Instrument};

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request`, attaching `credential` as a bearer token when given.
    /// Any HTTP status is a successful send; only transport failures error.
    async fn execute(
        &self,
        request: &PendingRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse>;
}

/// `reqwest`-backed transport with the configured base URL and timeout.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// # Errors
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|err| Error::Config(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: &PendingRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse> {
        let spec = request.spec();
        let url = self.config.url_for(&spec.path);

        let mut builder = self
            .client
            .request(spec.method.clone(), &url)
            .header(REQUEST_ID_HEADER, request.id().to_string());

        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(credential) = credential {
            builder = builder.header(AUTHORIZATION, credential.bearer());
        }
        if let Some(body) = &spec.body {
            builder = builder.body(body.clone());
        }

        let span = info_span!(
            "api.request",
            http.method = %spec.method,
            url = %url,
            authenticated = credential.is_some(),
            retried = request.retried()
        );
        let response = builder.send().instrument(span).await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(status, bytes = body.len(), "api response");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
