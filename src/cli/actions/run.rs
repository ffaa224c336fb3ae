use super::{auth, request, Action};
use anyhow::Result;

pub(super) async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Login(args) => auth::login(args).await,
        Action::Logout(globals) => auth::logout(&globals).await,
        Action::Session(globals) => auth::session(&globals).await,
        Action::Request(args) => request::execute(args).await,
    }
}
