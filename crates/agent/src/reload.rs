//! Hot reload of the command set.
//!
//! Used by the `/reload` operation and the config watcher. A reload
//! builds a whole new registry and swaps it in; if loading fails the
//! current registry stays in place.

use scriptrelay_core::{BotSettings, ConfigSource, CoreError, RegistryHandle};

pub struct ConfigReloader {
    source: ConfigSource,
    registry: RegistryHandle,
    /// Settings the process was started with. Only commands reload.
    startup: BotSettings,
}

impl ConfigReloader {
    pub fn new(source: ConfigSource, registry: RegistryHandle, startup: BotSettings) -> Self {
        Self {
            source,
            registry,
            startup,
        }
    }

    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// Reload the configuration file. Returns the new command count.
    pub async fn reload(&self) -> Result<usize, CoreError> {
        let config = match self.source.load().await {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Reload failed, keeping current commands");
                return Err(e);
            }
        };

        if config.bot != self.startup {
            tracing::warn!(
                max_threads = config.bot.max_threads,
                queue_size = config.bot.queue_size,
                "Bot settings changed; they take effect at next start",
            );
        }

        let registry = config.build_registry();
        let count = registry.len();
        self.registry.replace(registry).await;

        tracing::info!(commands = count, "Command registry reloaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use scriptrelay_core::config::CONFIG_FILE_NAME;

    use super::*;

    fn config_json(commands: &[&str]) -> String {
        let cmds: Vec<String> = commands
            .iter()
            .map(|name| format!(r#"{{ "cmd": "{name}", "script": "/bin/{name}.sh" }}"#))
            .collect();
        format!(
            r#"{{
                "bot": {{
                    "identity": "bot@x", "admin_identity": "admin@x",
                    "max_threads": 2, "queue_size": 4,
                    "listen_only_admin": false, "notify_admin_on_startup": false
                }},
                "cmds": [{}]
            }}"#,
            cmds.join(",")
        )
    }

    #[tokio::test]
    async fn reload_swaps_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, config_json(&["backup"])).expect("write");

        let source = ConfigSource::new(dir.path());
        let startup = source.load().await.expect("load");
        let handle = RegistryHandle::new(startup.build_registry());
        let reloader = ConfigReloader::new(source, handle.clone(), startup.bot);

        std::fs::write(&path, config_json(&["backup", "status"])).expect("rewrite");
        assert_eq!(reloader.reload().await.expect("reload"), 2);
        assert!(handle.snapshot().await.contains("status"));
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, config_json(&["backup"])).expect("write");

        let source = ConfigSource::new(dir.path());
        let startup = source.load().await.expect("load");
        let handle = RegistryHandle::new(startup.build_registry());
        let reloader = ConfigReloader::new(source, handle.clone(), startup.bot);

        std::fs::write(&path, "{ broken").expect("rewrite");
        assert_matches!(reloader.reload().await, Err(CoreError::Config(_)));
        assert!(handle.snapshot().await.contains("backup"));
    }
}
