use crate::config::{DEFAULT_API_PREFIX, DEFAULT_TIMEOUT};
use anyhow::{bail, Result};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_BACKEND_URL: &str = "backend-url";
pub const ARG_API_PREFIX: &str = "api-prefix";
pub const ARG_TIMEOUT_MS: &str = "timeout-ms";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BACKEND_URL)
                .long(ARG_BACKEND_URL)
                .help("Backend base URL, e.g. https://api.example.com")
                .env("AUTHFLOW_BACKEND_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_API_PREFIX)
                .long(ARG_API_PREFIX)
                .help("Path prefix appended to the backend URL")
                .env("AUTHFLOW_API_PREFIX")
                .default_value(DEFAULT_API_PREFIX)
                .global(true),
        )
        .arg(
            Arg::new(ARG_TIMEOUT_MS)
                .long(ARG_TIMEOUT_MS)
                .help("Request timeout in milliseconds")
                .env("AUTHFLOW_TIMEOUT_MS")
                .default_value("15000")
                .value_parser(clap::value_parser!(u64).range(1..))
                .global(true),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub backend_url: String,
    pub api_prefix: String,
    pub timeout: Duration,
}

impl Options {
    /// Parse backend arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the backend URL is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let backend_url = match matches.get_one::<String>(ARG_BACKEND_URL) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => bail!("missing required argument: --{ARG_BACKEND_URL}"),
        };

        let api_prefix = matches
            .get_one::<String>(ARG_API_PREFIX)
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_PREFIX.to_string());

        let timeout = matches
            .get_one::<u64>(ARG_TIMEOUT_MS)
            .copied()
            .map_or(DEFAULT_TIMEOUT, Duration::from_millis);

        Ok(Self {
            backend_url,
            api_prefix,
            timeout,
        })
    }
}
