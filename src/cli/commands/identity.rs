use anyhow::{bail, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::path::PathBuf;

pub const ARG_IDENTITY_URL: &str = "identity-url";
pub const ARG_IDENTITY_ANON_KEY: &str = "identity-anon-key";
pub const ARG_SESSION_FILE: &str = "session-file";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_IDENTITY_URL)
                .long(ARG_IDENTITY_URL)
                .help("Identity provider URL (GoTrue); without it requests go out anonymously")
                .env("AUTHFLOW_IDENTITY_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_IDENTITY_ANON_KEY)
                .long(ARG_IDENTITY_ANON_KEY)
                .help("Public anon key sent as the apikey header")
                .env("AUTHFLOW_IDENTITY_ANON_KEY")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new(ARG_SESSION_FILE)
                .long(ARG_SESSION_FILE)
                .help("File that keeps the signed-in session between runs")
                .env("AUTHFLOW_SESSION_FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub anon_key: SecretString,
    pub session_file: Option<PathBuf>,
}

impl Options {
    /// Parse identity arguments. `None` means no identity provider is
    /// configured.
    ///
    /// # Errors
    /// Returns an error if the URL is set without an anon key.
    pub fn parse(matches: &ArgMatches) -> Result<Option<Self>> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let Some(url) = get_non_empty(ARG_IDENTITY_URL) else {
            return Ok(None);
        };
        let Some(anon_key) = get_non_empty(ARG_IDENTITY_ANON_KEY) else {
            bail!("missing required argument: --{ARG_IDENTITY_ANON_KEY} (required with --{ARG_IDENTITY_URL})");
        };

        Ok(Some(Self {
            url,
            anon_key: SecretString::from(anon_key),
            session_file: matches.get_one::<PathBuf>(ARG_SESSION_FILE).cloned(),
        }))
    }
}
