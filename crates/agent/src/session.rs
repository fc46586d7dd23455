//! Process-wide session state shared by the console and remote paths.

use scriptrelay_core::Identity;
use tokio::sync::RwLock;

/// Open chat target plus the administrator settings fixed at startup.
#[derive(Debug)]
pub struct SessionState {
    /// Standing reply target for free-form console lines.
    open_chat: RwLock<Option<Identity>>,
    admin: Identity,
    listen_only_admin: bool,
}

impl SessionState {
    pub fn new(admin: Identity, listen_only_admin: bool) -> Self {
        Self {
            open_chat: RwLock::new(None),
            admin,
            listen_only_admin,
        }
    }

    pub fn admin(&self) -> &Identity {
        &self.admin
    }

    /// Whether a remote message from `from` should be handled.
    pub fn accepts_from(&self, from: &Identity) -> bool {
        !self.listen_only_admin || *from == self.admin
    }

    pub async fn open_chat(&self) -> Option<Identity> {
        self.open_chat.read().await.clone()
    }

    /// Open a chat with `peer`, returning the previously open one.
    pub async fn set_open_chat(&self, peer: Identity) -> Option<Identity> {
        self.open_chat.write().await.replace(peer)
    }

    /// Close the open chat, returning it if there was one.
    pub async fn close_chat(&self) -> Option<Identity> {
        self.open_chat.write().await.take()
    }
}
