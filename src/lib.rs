//! # Authflow (Session-Authenticated API Client)
//!
//! `authflow` is the client side of a bearer-token session. It keeps the
//! current credential in one shared store, attaches it to every API request
//! and recovers from expiry without bothering the caller.
//!
//! ## Session Store
//!
//! The store bootstraps once from the identity provider (bounded by a
//! timeout; an unreachable provider means anonymous mode) and follows the
//! provider's own sign-in, rotation and sign-out events afterwards.
//!
//! ## Request Pipeline
//!
//! A `401` triggers at most one refresh-and-replay per request. Concurrent
//! `401`s share a **single-flight** refresh: one upstream call, every waiter
//! gets the same outcome.
//!
//! ## Global Sign-Out
//!
//! When a session cannot be recovered, the session is cleared, the user is
//! notified and sent to the sign-in page exactly once per lost session, no
//! matter how many requests failed with it.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod pipeline;
pub mod refresh;
pub mod session;
pub mod signout;
pub mod surface;

pub use client::App;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use pipeline::{ApiResponse, AuthenticatedClient, RequestSpec};
pub use session::{Credential, Session, SessionState, SessionStore};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
