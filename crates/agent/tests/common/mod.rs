//! Shared helpers for agent integration tests.
//!
//! Builds a full dispatcher over a temporary store directory with real
//! `sh` scripts, a recording messenger and a recording console.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scriptrelay_agent::dispatch::CommandDispatcher;
use scriptrelay_agent::reload::ConfigReloader;
use scriptrelay_agent::session::SessionState;
use scriptrelay_core::config::CONFIG_FILE_NAME;
use scriptrelay_core::{
    ConfigSource, Console, ExecutionPool, Identity, Messenger, MessengerError, Outbox,
    OwnIdentity, PeerDevice, PoolConfig, ProcessRunner, RegistryHandle, TrustState,
};

pub const ADMIN: &str = "admin@example.org";

pub fn identity(raw: &str) -> Identity {
    Identity::parse(raw).expect("valid identity")
}

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(Identity, String)>>,
    closed: AtomicBool,
    fail_close: AtomicBool,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<(Identity, String)> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn texts_to(&self, to: &str) -> Vec<String> {
        let to = identity(to);
        self.sent()
            .into_iter()
            .filter(|(id, _)| *id == to)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make every later `close()` fail.
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, to: &Identity, text: &str) -> Result<(), MessengerError> {
        self.sent
            .lock()
            .expect("lock")
            .push((to.clone(), text.to_string()));
        Ok(())
    }

    async fn resolve_identity(&self, name: &str) -> Result<Identity, MessengerError> {
        Identity::parse(name).map_err(|_| MessengerError::UnknownIdentity(name.to_string()))
    }

    async fn list_peers(
        &self,
        _identity: Option<&Identity>,
    ) -> Result<Vec<PeerDevice>, MessengerError> {
        Ok(Vec::new())
    }

    async fn trust_status(&self, identity: &Identity) -> Result<Vec<PeerDevice>, MessengerError> {
        Err(MessengerError::UnknownIdentity(identity.to_string()))
    }

    async fn set_trust(
        &self,
        _identity: &Identity,
        _state: TrustState,
    ) -> Result<usize, MessengerError> {
        Ok(1)
    }

    async fn clear_device_list(&self) -> Result<(), MessengerError> {
        Ok(())
    }

    async fn regenerate_keys(&self) -> Result<OwnIdentity, MessengerError> {
        self.own_identity().await
    }

    async fn own_identity(&self) -> Result<OwnIdentity, MessengerError> {
        Ok(OwnIdentity {
            identity: identity("bot@example.org"),
            device_id: 7,
            fingerprint: "abcdef01".to_string(),
        })
    }

    async fn close(&self) -> Result<(), MessengerError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(MessengerError::Unavailable("connection already lost".to_string()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<String>>,
}

impl RecordingConsole {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("lock").clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl Console for RecordingConsole {
    fn print(&self, text: &str) {
        self.lines.lock().expect("lock").push(text.to_string());
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// One script command to register.
pub struct ScriptDef {
    pub name: &'static str,
    pub body: &'static str,
    pub output: &'static str,
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub dispatcher: CommandDispatcher,
    pub pool: Arc<ExecutionPool>,
    pub messenger: Arc<RecordingMessenger>,
    pub console: Arc<RecordingConsole>,
}

/// Write scripts and `config.json` into `dir`.
pub fn write_config(dir: &std::path::Path, defs: &[ScriptDef], listen_only_admin: bool) {
    let cmds: Vec<serde_json::Value> = defs
        .iter()
        .map(|def| {
            let path = dir.join(format!("{}.sh", def.name));
            std::fs::write(&path, format!("#!/bin/sh\n{}", def.body)).expect("write script");
            serde_json::json!({
                "cmd": def.name,
                "script": path.to_str().expect("utf-8 path"),
                "exec_type": "sh",
                "description": format!("Runs {}", def.name),
                "output": def.output,
            })
        })
        .collect();

    let config = serde_json::json!({
        "bot": {
            "identity": "bot@example.org",
            "admin_identity": ADMIN,
            "max_threads": 2,
            "queue_size": 4,
            "listen_only_admin": listen_only_admin,
            "notify_admin_on_startup": false,
            "watch_config": false
        },
        "cmds": cmds
    });
    std::fs::write(
        dir.join(CONFIG_FILE_NAME),
        serde_json::to_string_pretty(&config).expect("encode config"),
    )
    .expect("write config");
}

pub async fn harness(defs: &[ScriptDef], listen_only_admin: bool) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    write_config(dir.path(), defs, listen_only_admin);

    let source = ConfigSource::new(dir.path());
    let config = source.load().await.expect("load config");

    let messenger = Arc::new(RecordingMessenger::default());
    let console = Arc::new(RecordingConsole::default());
    let outbox = Outbox::new(messenger.clone(), console.clone());

    let pool = ExecutionPool::start(
        PoolConfig {
            workers: config.bot.max_threads,
            queue_size: config.bot.queue_size,
        },
        ProcessRunner::new(outbox.clone()),
    )
    .expect("start pool");

    let registry = RegistryHandle::new(config.build_registry());
    let reloader = Arc::new(ConfigReloader::new(
        source,
        registry.clone(),
        config.bot.clone(),
    ));
    let session = Arc::new(SessionState::new(
        config.bot.admin_identity.clone(),
        config.bot.listen_only_admin,
    ));
    let dispatcher =
        CommandDispatcher::new(session, registry, Arc::clone(&pool), outbox, reloader);

    Harness {
        dir,
        dispatcher,
        pool,
        messenger,
        console,
    }
}
