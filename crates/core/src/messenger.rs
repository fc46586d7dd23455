//! The messaging capability the agent talks through.
//!
//! Transport, encryption and key management live behind [`Messenger`];
//! the rest of the system only sends text to an [`Identity`] and asks
//! for or updates per-device trust decisions.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

/// A messaging address such as `alice@example.org`. Stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Validate and normalize an identity string.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation(
                "Identity must not be empty".to_string(),
            ));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(CoreError::Validation(format!(
                "Identity '{trimmed}' must not contain whitespace"
            )));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trust decision for one peer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    Trusted,
    Untrusted,
    Undecided,
}

impl TrustState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Untrusted => "untrusted",
            Self::Undecided => "undecided",
        }
    }
}

/// One known device of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDevice {
    pub identity: Identity,
    pub device_id: u32,
    pub fingerprint: String,
    pub trust: TrustState,
    pub last_seen: Option<Timestamp>,
}

/// The agent's own identity and key fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnIdentity {
    pub identity: Identity,
    pub device_id: u32,
    pub fingerprint: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Failed to send message to {to}: {reason}")]
    SendFailed { to: Identity, reason: String },

    #[error("Messenger unavailable: {0}")]
    Unavailable(String),

    #[error("Messenger error: {0}")]
    Other(String),
}

/// Opaque secure-messaging capability.
///
/// Implementations must be safe to call concurrently from the console
/// task, the inbound loop and script workers.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver `text` to `to`.
    async fn send(&self, to: &Identity, text: &str) -> Result<(), MessengerError>;

    /// Resolve a user-supplied name to a known identity.
    async fn resolve_identity(&self, name: &str) -> Result<Identity, MessengerError>;

    /// Known devices, optionally restricted to one identity.
    async fn list_peers(
        &self,
        identity: Option<&Identity>,
    ) -> Result<Vec<PeerDevice>, MessengerError>;

    /// Trust state of every known device of `identity`.
    async fn trust_status(&self, identity: &Identity) -> Result<Vec<PeerDevice>, MessengerError>;

    /// Set the trust state of all devices of `identity`. Returns how many
    /// devices were updated.
    async fn set_trust(&self, identity: &Identity, state: TrustState)
        -> Result<usize, MessengerError>;

    /// Forget cached peer device state.
    async fn clear_device_list(&self) -> Result<(), MessengerError>;

    /// Replace the agent's own keys, returning the new identity details.
    async fn regenerate_keys(&self) -> Result<OwnIdentity, MessengerError>;

    async fn own_identity(&self) -> Result<OwnIdentity, MessengerError>;

    /// Close the connection. Further sends fail with `Unavailable`.
    async fn close(&self) -> Result<(), MessengerError>;
}
