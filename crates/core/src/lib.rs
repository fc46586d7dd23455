//! `scriptrelay-core` -- command registry, configuration, and the
//! concurrent script execution subsystem.
//!
//! Everything in this crate is transport-agnostic: remote peers are reached
//! only through the [`Messenger`](messenger::Messenger) capability and the
//! local operator only through [`Console`](outbox::Console).

pub mod command;
pub mod config;
pub mod error;
pub mod messenger;
pub mod outbox;
pub mod registry;
pub mod scripting;
pub mod types;

pub use command::{CommandSpec, OutputPolicy};
pub use config::{AgentConfig, BotSettings, ConfigSource};
pub use error::CoreError;
pub use messenger::{Identity, Messenger, MessengerError, OwnIdentity, PeerDevice, TrustState};
pub use outbox::{Console, Outbox, ReplyTarget, StdoutConsole};
pub use registry::{CommandRegistry, RegistryHandle};
pub use scripting::executor::Invocation;
pub use scripting::pool::{ExecutionPool, InvocationHandle, PoolConfig, SubmitError};
pub use scripting::runner::ProcessRunner;
pub use scripting::status::ExecutionStatus;
