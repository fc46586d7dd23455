//! Invocation request type and script execution errors.

use std::fmt;
use std::sync::Arc;

use crate::command::CommandSpec;
use crate::outbox::ReplyTarget;
use crate::types::{InvocationId, Timestamp};

/// One request to run a command.
///
/// Holds its own `Arc<CommandSpec>` so a configuration reload during
/// execution does not affect it.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: InvocationId,
    pub spec: Arc<CommandSpec>,
    /// Caller arguments appended after the script path.
    pub args: Vec<String>,
    pub reply_to: ReplyTarget,
    pub requested_at: Timestamp,
}

impl Invocation {
    pub fn new(spec: Arc<CommandSpec>, args: Vec<String>, reply_to: ReplyTarget) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            spec,
            args,
            reply_to,
            requested_at: chrono::Utc::now(),
        }
    }

    pub fn command_name(&self) -> &str {
        &self.spec.name
    }

    /// Full process argument vector.
    pub fn argv(&self) -> Vec<String> {
        self.spec.argv(&self.args)
    }
}

/// Errors that can occur while running a script process.
#[derive(Debug)]
pub enum ScriptError {
    /// The process could not be spawned.
    LaunchFailed(std::io::Error),
    /// Reading the process output or waiting for it failed.
    Io(std::io::Error),
    /// The process exceeded its configured timeout and was killed.
    Timeout {
        /// Elapsed wall-clock time before the process was killed.
        elapsed_ms: u64,
    },
    /// The process was killed by a pool shutdown.
    Cancelled,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LaunchFailed(err) => write!(f, "Failed to launch process: {err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Timeout { elapsed_ms } => {
                write!(f, "Script timed out after {elapsed_ms}ms")
            }
            Self::Cancelled => write!(f, "Script was cancelled"),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::LaunchFailed(err) | Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
