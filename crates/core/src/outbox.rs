//! Routing of user-visible text to the console or a remote identity.

use std::fmt;
use std::sync::Arc;

use crate::messenger::{Identity, Messenger, MessengerError};

/// Local operator output.
pub trait Console: Send + Sync {
    fn print(&self, text: &str);
}

/// Console that writes to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn print(&self, text: &str) {
        use std::io::Write;
        let mut out = std::io::stdout().lock();
        // Text that already ends in a newline is printed as-is.
        let _ = if text.ends_with('\n') {
            write!(out, "{text}")
        } else {
            writeln!(out, "{text}")
        };
        let _ = out.flush();
    }
}

/// Where replies for an invocation go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    Console,
    Remote(Identity),
}

impl ReplyTarget {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Console => None,
            Self::Remote(identity) => Some(identity),
        }
    }
}

impl fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => f.write_str("console"),
            Self::Remote(identity) => write!(f, "{identity}"),
        }
    }
}

/// Delivers text to a [`ReplyTarget`].
///
/// Send failures are logged and reported to the local operator; they are
/// never returned to the caller.
#[derive(Clone)]
pub struct Outbox {
    messenger: Arc<dyn Messenger>,
    console: Arc<dyn Console>,
}

impl Outbox {
    pub fn new(messenger: Arc<dyn Messenger>, console: Arc<dyn Console>) -> Self {
        Self { messenger, console }
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.messenger
    }

    /// Print to the local console.
    pub fn print(&self, text: &str) {
        self.console.print(text);
    }

    pub async fn deliver(&self, target: &ReplyTarget, text: &str) {
        match target {
            ReplyTarget::Console => self.console.print(text),
            ReplyTarget::Remote(identity) => {
                if let Err(e) = self.messenger.send(identity, text).await {
                    self.report_send_failure(identity, &e);
                }
            }
        }
    }

    /// Send to a remote identity, returning the error as well as logging it.
    pub async fn send(&self, to: &Identity, text: &str) -> Result<(), MessengerError> {
        let result = self.messenger.send(to, text).await;
        if let Err(e) = &result {
            self.report_send_failure(to, e);
        }
        result
    }

    fn report_send_failure(&self, to: &Identity, error: &MessengerError) {
        tracing::warn!(to = %to, error = %error, "Failed to deliver message");
        self.console
            .print(&format!("Could not deliver message to {to}: {error}"));
    }
}
