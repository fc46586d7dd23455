//! Terminal status of one script invocation.

use std::fmt;

/// How an invocation ended. Every variant releases the command's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The process exited on its own. `exit_code` is `None` when it was
    /// terminated by a signal.
    Completed { exit_code: Option<i32> },
    /// The process could not be launched or its output could not be read.
    Failed,
    /// The process exceeded its configured timeout and was killed.
    TimedOut,
    /// The process was killed by a pool shutdown.
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    /// `true` only for a process that exited with code 0.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { exit_code: Some(0) })
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed {
                exit_code: Some(code),
            } => write!(f, "completed (exit code {code})"),
            Self::Completed { exit_code: None } => write!(f, "completed (killed by signal)"),
            other => f.write_str(other.as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
