//! Config file watcher.
//!
//! [`ConfigWatcher`] runs as a background task. A `notify` watcher on the
//! store directory runs on its own thread and forwards events for
//! `config.json` into a channel; the task debounces them and reloads the
//! command set.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::reload::ConfigReloader;

/// Quiet period after an event before the file is re-read.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

const EVENT_CHANNEL_CAPACITY: usize = 16;

pub struct ConfigWatcher {
    reloader: Arc<ConfigReloader>,
    debounce: Duration,
}

impl ConfigWatcher {
    pub fn new(reloader: Arc<ConfigReloader>) -> Self {
        Self {
            reloader,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Run the watch loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let source = self.reloader.source();
        let path = source.config_path();
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let _thread = spawn_watch_thread(source.store_dir().to_path_buf(), path.clone(), event_tx, stop_rx);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Config watcher cancelled");
                    break;
                }
                event = event_rx.recv() => if event.is_none() {
                    tracing::warn!(path = %path.display(), "Config watcher stopped delivering events");
                    break;
                },
            }

            // Editors often write in several steps; coalesce the burst.
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Config watcher cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.debounce) => {}
            }
            while event_rx.try_recv().is_ok() {}

            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                tracing::info!(path = %path.display(), "Config file changed, reloading");
                // Failures are logged by the reloader; keep watching.
                let _ = self.reloader.reload().await;
            } else {
                tracing::warn!(path = %path.display(), "Config file deleted");
            }
        }

        drop(stop_tx);
    }
}

/// Watch `dir` for changes to `file` until `stop` is dropped.
///
/// The directory is watched rather than the file so that editors which
/// replace the file by rename keep being observed.
fn spawn_watch_thread(
    dir: PathBuf,
    file: PathBuf,
    events: mpsc::Sender<()>,
    stop: std::sync::mpsc::Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let file_name = file.file_name().map(|name| name.to_os_string());
        let mut watcher = match RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) && event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref());
                    if relevant {
                        let _ = events.try_send(());
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher error");
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize config watcher");
                return;
            }
        };

        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            tracing::error!(directory = %dir.display(), error = %e, "Failed to watch store directory");
            return;
        }
        tracing::info!(path = %file.display(), "Config watcher started");

        let _ = stop.recv();
    })
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use scriptrelay_core::config::CONFIG_FILE_NAME;
    use scriptrelay_core::{ConfigSource, RegistryHandle};

    use super::*;

    const CONFIG: &str = r#"{
        "bot": {
            "identity": "bot@x", "admin_identity": "admin@x",
            "max_threads": 1, "queue_size": 1,
            "listen_only_admin": false, "notify_admin_on_startup": false
        },
        "cmds": [ { "cmd": "backup", "script": "/bin/backup.sh" } ]
    }"#;

    /// Rewrite the file and put its old modification time back, as `cp -p` does.
    fn rewrite_keeping_mtime(path: &std::path::Path, contents: &str, mtime: SystemTime) {
        std::fs::write(path, contents).expect("rewrite");
        std::fs::File::options()
            .write(true)
            .open(path)
            .expect("open")
            .set_modified(mtime)
            .expect("set mtime");
    }

    #[tokio::test]
    async fn reloads_on_change_with_unchanged_mtime_and_stops_on_cancel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, CONFIG).expect("write");
        let mtime = std::fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .expect("mtime");

        let source = ConfigSource::new(dir.path());
        let startup = source.load().await.expect("load");
        let handle = RegistryHandle::new(startup.build_registry());
        let reloader = Arc::new(ConfigReloader::new(source, handle.clone(), startup.bot));

        let watcher = ConfigWatcher::new(reloader).with_debounce(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move { watcher.run(task_cancel).await });

        // Give the watch thread time to register.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut reloaded = false;
        for _ in 0..10 {
            rewrite_keeping_mtime(&path, &CONFIG.replace("backup", "restore"), mtime);
            tokio::time::sleep(Duration::from_millis(500)).await;
            if handle.snapshot().await.contains("restore") {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded, "watcher should pick up the new command");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("watcher stops")
            .expect("watcher task");
    }

    #[tokio::test]
    async fn deletion_keeps_current_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, CONFIG).expect("write");

        let source = ConfigSource::new(dir.path());
        let startup = source.load().await.expect("load");
        let handle = RegistryHandle::new(startup.build_registry());
        let reloader = Arc::new(ConfigReloader::new(source, handle.clone(), startup.bot));

        let watcher = ConfigWatcher::new(reloader).with_debounce(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move { watcher.run(task_cancel).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::remove_file(&path).expect("remove");
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(handle.snapshot().await.contains("backup"));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("watcher stops")
            .expect("watcher task");
    }
}
