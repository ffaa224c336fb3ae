pub mod api;
pub mod identity;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

pub const CMD_LOGIN: &str = "login";
pub const CMD_LOGOUT: &str = "logout";
pub const CMD_SESSION: &str = "session";
pub const CMD_REQUEST: &str = "request";

pub const ARG_EMAIL: &str = "email";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_METHOD: &str = "method";
pub const ARG_PATH: &str = "path";
pub const ARG_DATA: &str = "data";
pub const ARG_HEADER: &str = "header";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("authflow")
        .about("Session-authenticated API client")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new(CMD_LOGIN)
                .about("Sign in with email and password")
                .arg(
                    Arg::new(ARG_EMAIL)
                        .long(ARG_EMAIL)
                        .short('e')
                        .help("Account email")
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_PASSWORD)
                        .long(ARG_PASSWORD)
                        .short('p')
                        .help("Account password")
                        .env("AUTHFLOW_PASSWORD")
                        .hide_env_values(true)
                        .required(true),
                ),
        )
        .subcommand(Command::new(CMD_LOGOUT).about("Sign out and forget the stored session"))
        .subcommand(Command::new(CMD_SESSION).about("Show the current session"))
        .subcommand(
            Command::new(CMD_REQUEST)
                .about("Send an authenticated request to the API")
                .arg(
                    Arg::new(ARG_METHOD)
                        .help("HTTP method, e.g. GET or POST")
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_PATH)
                        .help("Path relative to the API base, e.g. /chat")
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_DATA)
                        .long(ARG_DATA)
                        .short('d')
                        .help("JSON request body"),
                )
                .arg(
                    Arg::new(ARG_HEADER)
                        .long(ARG_HEADER)
                        .short('H')
                        .help("Extra header as Name:Value (repeatable)")
                        .action(ArgAction::Append),
                ),
        );

    let command = api::with_args(command);
    let command = identity::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "authflow");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Session-authenticated API client".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_request_args() -> Result<(), Box<dyn std::error::Error>> {
        let matches = new().try_get_matches_from(vec![
            "authflow",
            "--backend-url",
            "https://api.example.com",
            "request",
            "POST",
            "/summarize",
            "--data",
            r#"{"text":"hi"}"#,
            "-H",
            "X-Trace:1",
            "-H",
            "Accept:application/json",
        ])?;

        assert_eq!(
            matches.get_one::<String>(api::ARG_BACKEND_URL).cloned(),
            Some("https://api.example.com".to_string())
        );
        let Some((name, sub)) = matches.subcommand() else {
            return Err("expected a subcommand".into());
        };
        assert_eq!(name, CMD_REQUEST);
        assert_eq!(sub.get_one::<String>(ARG_METHOD).cloned(), Some("POST".to_string()));
        assert_eq!(
            sub.get_many::<String>(ARG_HEADER)
                .map(|values| values.cloned().collect::<Vec<_>>()),
            Some(vec![
                "X-Trace:1".to_string(),
                "Accept:application/json".to_string()
            ])
        );
        Ok(())
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("AUTHFLOW_BACKEND_URL", Some("https://api.example.com")),
                ("AUTHFLOW_API_PREFIX", Some("/v2")),
                ("AUTHFLOW_TIMEOUT_MS", Some("2500")),
                ("AUTHFLOW_IDENTITY_URL", Some("https://id.example.com")),
                ("AUTHFLOW_IDENTITY_ANON_KEY", Some("anon")),
                ("AUTHFLOW_PASSWORD", Some("hunter2")),
                ("AUTHFLOW_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["authflow", "login", "-e", "ada@example.com"]);
                assert_eq!(
                    matches.get_one::<String>(api::ARG_API_PREFIX).cloned(),
                    Some("/v2".to_string())
                );
                assert_eq!(
                    matches.get_one::<u64>(api::ARG_TIMEOUT_MS).copied(),
                    Some(2500)
                );
                assert_eq!(
                    matches.get_one::<String>(identity::ARG_IDENTITY_URL).cloned(),
                    Some("https://id.example.com".to_string())
                );
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
                let login = matches.subcommand_matches(CMD_LOGIN);
                assert_eq!(
                    login.and_then(|m| m.get_one::<String>(ARG_PASSWORD).cloned()),
                    Some("hunter2".to_string())
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("AUTHFLOW_LOG_LEVEL", None::<String>)], || {
                let mut args = vec!["authflow".to_string(), "session".to_string()];
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_missing_subcommand_fails() {
        let result = new().try_get_matches_from(vec!["authflow"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_timeout_must_be_positive() {
        let result = new().try_get_matches_from(vec!["authflow", "--timeout-ms", "0", "session"]);
        assert_eq!(
            result.map(|_| ()).map_err(|e| e.kind()),
            Err(clap::error::ErrorKind::ValueValidation)
        );
    }
}
