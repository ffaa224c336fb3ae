use crate::{cli::globals::GlobalArgs, error::Error, pipeline::RequestSpec};
use anyhow::{anyhow, bail, Context, Result};
use reqwest::Method;
use serde_json::Value;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub method: Method,
    pub path: String,
    pub data: Option<Value>,
    pub headers: Vec<(String, String)>,
}

/// Parses an HTTP method name, case-insensitively.
///
/// # Errors
/// Returns an error for names that are not valid HTTP methods.
pub fn parse_method(raw: &str) -> Result<Method> {
    Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow!("invalid HTTP method: {raw}"))
}

/// Parses `Name:Value` into a header pair.
///
/// # Errors
/// Returns an error if there is no `:` or the name is empty.
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("invalid header {raw:?}, expected Name:Value"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("invalid header {raw:?}, the name is empty");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Sends one request through the authenticated pipeline and prints the body.
///
/// # Errors
/// Returns an error if the session cannot be recovered, the request fails
/// or the API answers with a non-2xx status.
pub async fn execute(args: Args) -> Result<()> {
    let app = args.globals.app(&args.path)?;
    app.initialize().await;

    let mut spec = RequestSpec::new(args.method, args.path);
    for (name, value) in args.headers {
        spec = spec.header(name, value);
    }
    if let Some(data) = &args.data {
        spec = spec.json(data)?;
    }

    let result = app.client().send(spec).await;
    app.teardown();

    let response = match result {
        Ok(response) => response,
        Err(Error::Unauthenticated) => {
            bail!("session expired, sign in again with `authflow login`")
        }
        Err(err) => return Err(anyhow::Error::new(err).context("request failed")),
    };

    info!(status = response.status, "response received");
    let body = response.text();
    if !body.is_empty() {
        println!("{body}");
    }
    if !response.is_success() {
        bail!("request failed with status {}", response.status);
    }
    Ok(())
}
