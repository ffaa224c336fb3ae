//! Route guard for pages that need a signed-in user. This is a UX guard
//! only; the API still enforces access on every request.

use crate::session::{SessionState, SessionStore};
use url::form_urlencoded;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    /// Bootstrap has not settled yet; show a loading state.
    Pending,
    Allow,
    Redirect(String),
}

#[must_use]
pub fn check(store: &SessionStore, sign_in_path: &str, location: &str) -> GuardDecision {
    match store.state() {
        SessionState::Uninitialized | SessionState::Loading => GuardDecision::Pending,
        SessionState::Authenticated => GuardDecision::Allow,
        SessionState::Anonymous => GuardDecision::Redirect(sign_in_link(sign_in_path, location)),
    }
}

/// Sign-in path carrying the page to come back to after login.
#[must_use]
pub fn sign_in_link(sign_in_path: &str, location: &str) -> String {
    let location = location.trim();
    if location.is_empty() || location == sign_in_path {
        return sign_in_path.to_string();
    }

    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("returnTo", location)
        .finish();
    let separator = if sign_in_path.contains('?') { '&' } else { '?' };

    format!("{sign_in_path}{separator}{query}")
}
