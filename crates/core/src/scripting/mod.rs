//! Concurrent script execution.
//!
//! [`runner::ProcessRunner`] runs a single invocation as a child process;
//! [`pool::ExecutionPool`] owns the worker set, the bounded admission
//! queue and the one-in-flight-per-command rule.

pub mod executor;
pub mod pool;
pub mod runner;
pub mod status;
