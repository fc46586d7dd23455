//! `scriptrelay-agent` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod admin;
pub mod console;
pub mod dispatch;
pub mod inbound;
pub mod offline;
pub mod reload;
pub mod session;
pub mod shutdown;
pub mod watcher;
