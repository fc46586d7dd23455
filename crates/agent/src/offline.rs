//! Offline messenger for running the agent without a transport.
//!
//! Outbound messages are printed to the console and logged. Peer devices
//! and their trust decisions are persisted in `trusted_states.json` in
//! the store directory. Device ids and fingerprints are derived from
//! SHA-256 digests of the identity; nothing here is real cryptography.
//!
//! Messages addressed to the agent's own identity are looped back into
//! the inbound channel as if the administrator had sent them, which lets
//! an operator exercise the remote command path from the console.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use scriptrelay_core::{
    Console, Identity, Messenger, MessengerError, OwnIdentity, PeerDevice, TrustState,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};

use crate::inbound::InboundMessage;

/// File name of the persisted trust store inside the store directory.
pub const TRUST_STORE_FILE_NAME: &str = "trusted_states.json";

/// Name that `/chat`, `/send` and friends accept for the administrator.
const ADMIN_ALIAS: &str = "admin";

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrustFile {
    /// Own device id after a key regeneration; derived from the identity
    /// until then.
    #[serde(default)]
    own_device_id: Option<u32>,
    #[serde(default)]
    devices: Vec<PeerDevice>,
}

pub struct OfflineMessenger {
    identity: Identity,
    admin: Identity,
    store_path: PathBuf,
    state: Mutex<TrustFile>,
    console: Arc<dyn Console>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    closed: AtomicBool,
}

impl OfflineMessenger {
    /// Open the trust store in `store_dir`, creating it on first use.
    pub async fn open(
        store_dir: &Path,
        identity: Identity,
        admin: Identity,
        console: Arc<dyn Console>,
    ) -> Result<Self, MessengerError> {
        let store_path = store_dir.join(TRUST_STORE_FILE_NAME);
        let mut state = load_trust_file(&store_path).await?;

        if !state.devices.iter().any(|d| d.identity == admin) {
            state.devices.push(derived_device(&admin));
        }

        let messenger = Self {
            identity,
            admin,
            store_path,
            state: Mutex::new(state),
            console,
            inbound: None,
            closed: AtomicBool::new(false),
        };
        messenger.persist(&*messenger.state.lock().await).await?;
        tracing::info!(
            path = %messenger.store_path.display(),
            "Offline messenger ready",
        );
        Ok(messenger)
    }

    /// Loop messages sent to the own identity back into `tx`.
    pub fn with_loopback(mut self, tx: mpsc::Sender<InboundMessage>) -> Self {
        self.inbound = Some(tx);
        self
    }

    fn ensure_open(&self) -> Result<(), MessengerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessengerError::Unavailable(
                "connection closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn persist(&self, state: &TrustFile) -> Result<(), MessengerError> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| MessengerError::Other(format!("Failed to encode trust store: {e}")))?;
        tokio::fs::write(&self.store_path, json)
            .await
            .map_err(|e| {
                MessengerError::Other(format!(
                    "Failed to write {}: {e}",
                    self.store_path.display()
                ))
            })
    }

    fn own_from(&self, state: &TrustFile) -> OwnIdentity {
        let device_id = state
            .own_device_id
            .unwrap_or_else(|| derive_device_id(&self.identity));
        OwnIdentity {
            identity: self.identity.clone(),
            device_id,
            fingerprint: fingerprint(&self.identity, device_id),
        }
    }
}

#[async_trait]
impl Messenger for OfflineMessenger {
    async fn send(&self, to: &Identity, text: &str) -> Result<(), MessengerError> {
        self.ensure_open()?;

        if *to == self.identity {
            if let Some(tx) = &self.inbound {
                let message = InboundMessage {
                    from: self.admin.clone(),
                    body: text.to_string(),
                };
                // The inbound loop may itself be waiting on this send.
                return tx.try_send(message).map_err(|e| MessengerError::SendFailed {
                    to: to.clone(),
                    reason: e.to_string(),
                });
            }
        }

        {
            let state = self.state.lock().await;
            let devices: Vec<&PeerDevice> =
                state.devices.iter().filter(|d| d.identity == *to).collect();
            if !devices.is_empty() && devices.iter().all(|d| d.trust == TrustState::Untrusted) {
                return Err(MessengerError::SendFailed {
                    to: to.clone(),
                    reason: "no trusted device".to_string(),
                });
            }
        }

        tracing::info!(to = %to, bytes = text.len(), "Message sent");
        self.console.print(&format!("[to {to}] {text}"));
        Ok(())
    }

    async fn resolve_identity(&self, name: &str) -> Result<Identity, MessengerError> {
        let identity = if name.trim().eq_ignore_ascii_case(ADMIN_ALIAS) {
            self.admin.clone()
        } else {
            Identity::parse(name).map_err(|_| MessengerError::UnknownIdentity(name.to_string()))?
        };

        let mut state = self.state.lock().await;
        if !state.devices.iter().any(|d| d.identity == identity) {
            tracing::info!(identity = %identity, "New peer device seen");
            state.devices.push(derived_device(&identity));
            self.persist(&state).await?;
        }
        Ok(identity)
    }

    async fn list_peers(
        &self,
        identity: Option<&Identity>,
    ) -> Result<Vec<PeerDevice>, MessengerError> {
        let state = self.state.lock().await;
        Ok(state
            .devices
            .iter()
            .filter(|d| identity.map_or(true, |id| d.identity == *id))
            .cloned()
            .collect())
    }

    async fn trust_status(&self, identity: &Identity) -> Result<Vec<PeerDevice>, MessengerError> {
        let devices = self.list_peers(Some(identity)).await?;
        if devices.is_empty() {
            return Err(MessengerError::UnknownIdentity(identity.to_string()));
        }
        Ok(devices)
    }

    async fn set_trust(
        &self,
        identity: &Identity,
        trust: TrustState,
    ) -> Result<usize, MessengerError> {
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for device in state.devices.iter_mut().filter(|d| d.identity == *identity) {
            device.trust = trust;
            device.last_seen = Some(chrono::Utc::now());
            updated += 1;
        }
        if updated == 0 {
            return Err(MessengerError::UnknownIdentity(identity.to_string()));
        }
        self.persist(&state).await?;
        Ok(updated)
    }

    async fn clear_device_list(&self) -> Result<(), MessengerError> {
        let mut state = self.state.lock().await;
        let removed = state.devices.len();
        state.devices.clear();
        self.persist(&state).await?;
        tracing::info!(removed, "Device list cleared");
        Ok(())
    }

    async fn regenerate_keys(&self) -> Result<OwnIdentity, MessengerError> {
        let mut state = self.state.lock().await;
        state.own_device_id = Some(rand::random::<u32>() & 0x7fff_ffff);
        self.persist(&state).await?;
        Ok(self.own_from(&state))
    }

    async fn own_identity(&self) -> Result<OwnIdentity, MessengerError> {
        let state = self.state.lock().await;
        Ok(self.own_from(&state))
    }

    async fn close(&self) -> Result<(), MessengerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Offline messenger closed");
        }
        Ok(())
    }
}

// ---- private helpers ----

async fn load_trust_file(path: &Path) -> Result<TrustFile, MessengerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => serde_json::from_str(&text).map_err(|e| {
            MessengerError::Other(format!("Malformed trust store {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TrustFile::default()),
        Err(e) => Err(MessengerError::Other(format!(
            "Failed to read {}: {e}",
            path.display()
        ))),
    }
}

fn derive_device_id(identity: &Identity) -> u32 {
    let digest = Sha256::digest(identity.as_str().as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7fff_ffff
}

/// Hex SHA-256 of identity and device id, in space-separated blocks of 8.
fn fingerprint(identity: &Identity, device_id: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_str().as_bytes());
    hasher.update(device_id.to_be_bytes());
    let hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    hex.as_bytes()
        .chunks(8)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn derived_device(identity: &Identity) -> PeerDevice {
    let device_id = derive_device_id(identity);
    PeerDevice {
        identity: identity.clone(),
        device_id,
        fingerprint: fingerprint(identity, device_id),
        trust: TrustState::Undecided,
        last_seen: Some(chrono::Utc::now()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
