use crate::{cli::globals::GlobalArgs, identity::IdentityProvider};
use anyhow::{Context, Result};
use secrecy::SecretString;
use serde_json::json;
use tracing::warn;

#[derive(Debug)]
pub struct LoginArgs {
    pub globals: GlobalArgs,
    pub email: String,
    pub password: SecretString,
}

const MISSING_IDENTITY: &str =
    "no identity provider configured: set --identity-url and --identity-anon-key";

/// Signs in and keeps the session in the session file.
///
/// # Errors
/// Returns an error if no identity provider is configured or sign-in fails.
pub async fn login(args: LoginArgs) -> Result<()> {
    let provider = args.globals.gotrue()?.context(MISSING_IDENTITY)?;
    if args.globals.session_file.is_none() {
        warn!("No --session-file set, the session ends with this process");
    }

    let auth = provider
        .sign_in_with_password(&args.email, &args.password)
        .await
        .context("sign-in failed")?;

    println!(
        "Signed in as {}",
        auth.principal.email.as_deref().unwrap_or(&auth.principal.id)
    );
    Ok(())
}

/// Drops the stored session locally and at the identity provider.
///
/// # Errors
/// Returns an error if no identity provider is configured or the stored
/// session cannot be read.
pub async fn logout(globals: &GlobalArgs) -> Result<()> {
    let provider = globals.gotrue()?.context(MISSING_IDENTITY)?;

    if provider.current_session().await?.is_none() {
        println!("Not signed in");
        return Ok(());
    }

    // The local session is gone even when the remote call fails.
    if let Err(err) = provider.sign_out().await {
        warn!("Identity provider sign-out failed: {}", err);
    }
    println!("Signed out");
    Ok(())
}

/// Prints the resolved session as JSON.
///
/// # Errors
/// Returns an error if the configuration is invalid.
pub async fn session(globals: &GlobalArgs) -> Result<()> {
    let app = globals.app("/")?;
    let session = app.initialize().await;

    let output = json!({
        "state": session.state().as_str(),
        "user": session.principal(),
    });
    app.teardown();

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
