//! Maps validated CLI matches to an [`Action`].

use crate::cli::{
    actions::{auth::LoginArgs, request, Action},
    commands::{
        self, api, identity, ARG_DATA, ARG_EMAIL, ARG_HEADER, ARG_METHOD, ARG_PASSWORD, ARG_PATH,
    },
    globals::GlobalArgs,
};
use anyhow::{bail, Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let globals = GlobalArgs::new(
        api::Options::parse(matches)?,
        identity::Options::parse(matches)?,
    );

    match matches.subcommand() {
        Some((commands::CMD_LOGIN, sub_m)) => {
            let email = sub_m
                .get_one::<String>(ARG_EMAIL)
                .cloned()
                .context("missing required argument: --email")?;
            let password = sub_m
                .get_one::<String>(ARG_PASSWORD)
                .cloned()
                .context("missing required argument: --password")?;

            Ok(Action::Login(LoginArgs {
                globals,
                email,
                password: SecretString::from(password),
            }))
        }
        Some((commands::CMD_LOGOUT, _)) => Ok(Action::Logout(globals)),
        Some((commands::CMD_SESSION, _)) => Ok(Action::Session(globals)),
        Some((commands::CMD_REQUEST, sub_m)) => {
            let method = sub_m
                .get_one::<String>(ARG_METHOD)
                .context("missing required argument: METHOD")?;
            let path = sub_m
                .get_one::<String>(ARG_PATH)
                .cloned()
                .context("missing required argument: PATH")?;

            let data = sub_m
                .get_one::<String>(ARG_DATA)
                .map(|raw| {
                    serde_json::from_str::<serde_json::Value>(raw)
                        .context("--data is not valid JSON")
                })
                .transpose()?;

            let headers = sub_m
                .get_many::<String>(ARG_HEADER)
                .into_iter()
                .flatten()
                .map(String::as_str)
                .map(request::parse_header)
                .collect::<Result<Vec<_>>>()?;

            Ok(Action::Request(request::Args {
                globals,
                method: request::parse_method(method)?,
                path,
                data,
                headers,
            }))
        }
        _ => bail!("unknown command, see --help"),
    }
}
