//! UI-facing collaborators: the toast surface and the router. Both are
//! fire-and-forget; nothing in the client waits on them.

use std::sync::{Mutex, PoisonError};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NavigateOptions {
    pub replace: bool,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

pub trait Navigator: Send + Sync {
    /// Path (with query) the user is currently looking at.
    fn current_location(&self) -> String;

    fn navigate_to(&self, path: &str, options: NavigateOptions);
}

/// Notifier that writes to the log, used by the CLI.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(target: "notify", "{message}"),
            Severity::Warning => warn!(target: "notify", "{message}"),
            Severity::Error => error!(target: "notify", "{message}"),
        }
    }
}

/// Navigator for headless use: it remembers where it was sent and logs it.
#[derive(Debug)]
pub struct LogNavigator {
    location: Mutex<String>,
}

impl LogNavigator {
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: Mutex::new(location.into()),
        }
    }
}

impl Navigator for LogNavigator {
    fn current_location(&self) -> String {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn navigate_to(&self, path: &str, options: NavigateOptions) {
        info!(path, replace = options.replace, "navigate");
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = path.to_string();
    }
}
