//! Agent configuration: the `config.json` file in the store directory.
//!
//! The file has two sections, `bot` (identities, pool sizing and
//! behaviour flags) and `cmds` (the script command catalogue). Loading
//! validates everything up front so a bad file is rejected as a whole and
//! never leaves a half-applied configuration behind.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::command::{CommandSpec, OutputPolicy};
use crate::error::CoreError;
use crate::messenger::Identity;
use crate::registry::CommandRegistry;

/// File name of the configuration inside the store directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Environment variable consulted when no store directory is given on the
/// command line.
pub const STORE_DIR_ENV: &str = "SCRIPTRELAY_STORE_DIR";

// ---------------------------------------------------------------------------
// File model
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConfigFile {
    bot: Option<BotSection>,
    #[serde(default)]
    cmds: Vec<CommandEntry>,
}

#[derive(Debug, Deserialize)]
struct BotSection {
    identity: Option<String>,
    admin_identity: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    max_threads: Option<u64>,
    #[serde(default, deserialize_with = "lenient_number")]
    queue_size: Option<u64>,
    listen_only_admin: Option<bool>,
    notify_admin_on_startup: Option<bool>,
    #[serde(default = "default_watch_config")]
    watch_config: bool,
}

#[derive(Debug, Deserialize)]
struct CommandEntry {
    cmd: Option<String>,
    script: Option<String>,
    exec_type: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    output: OutputPolicy,
    #[serde(default, deserialize_with = "lenient_number")]
    timeout_secs: Option<u64>,
    #[serde(default)]
    capture_stderr: bool,
    #[serde(default)]
    allow_args: bool,
}

fn default_watch_config() -> bool {
    true
}

/// Accept numbers written either as JSON numbers or as numeric strings.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("'{s}' is not a valid number"))),
    }
}

// ---------------------------------------------------------------------------
// Validated model
// ---------------------------------------------------------------------------

/// Process-wide settings from the `bot` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSettings {
    /// The agent's own messaging identity.
    pub identity: Identity,
    /// The administrator's identity.
    pub admin_identity: Identity,
    /// Number of concurrent script workers.
    pub max_threads: usize,
    /// Capacity of the admission queue.
    pub queue_size: usize,
    /// Ignore remote messages from anyone but the administrator.
    pub listen_only_admin: bool,
    /// Send the administrator a message once the agent is ready.
    pub notify_admin_on_startup: bool,
    /// Reload the command set automatically when the file changes.
    pub watch_config: bool,
}

/// A fully validated configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bot: BotSettings,
    /// Command specs in file order, duplicates included.
    pub commands: Vec<CommandSpec>,
}

impl AgentConfig {
    /// Parse and validate configuration text.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let file: ConfigFile = serde_json::from_str(text)
            .map_err(|e| CoreError::Config(format!("Malformed configuration: {e}")))?;

        let bot = validate_bot(file.bot)?;
        let commands = file
            .cmds
            .into_iter()
            .enumerate()
            .map(|(index, entry)| validate_command(index, entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { bot, commands })
    }

    /// Build the command registry. Duplicate names are logged and skipped;
    /// the first occurrence wins.
    pub fn build_registry(&self) -> CommandRegistry {
        let (registry, duplicates) = CommandRegistry::from_specs(self.commands.iter().cloned());
        for name in duplicates {
            tracing::warn!(command = %name, "Duplicate command in configuration, keeping the first");
        }
        registry
    }
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, CoreError> {
    value.ok_or_else(|| CoreError::Config(format!("Missing required field '{field}'")))
}

fn validate_bot(section: Option<BotSection>) -> Result<BotSettings, CoreError> {
    let bot = require(section, "bot")?;

    let identity = require(bot.identity, "bot.identity")?;
    let admin_identity = require(bot.admin_identity, "bot.admin_identity")?;
    let max_threads = require(bot.max_threads, "bot.max_threads")?;
    let queue_size = require(bot.queue_size, "bot.queue_size")?;

    if max_threads < 1 {
        return Err(CoreError::Config(
            "bot.max_threads must be at least 1".to_string(),
        ));
    }
    if queue_size < 1 {
        return Err(CoreError::Config(
            "bot.queue_size must be at least 1".to_string(),
        ));
    }

    Ok(BotSettings {
        identity: Identity::parse(&identity)
            .map_err(|e| CoreError::Config(format!("bot.identity: {e}")))?,
        admin_identity: Identity::parse(&admin_identity)
            .map_err(|e| CoreError::Config(format!("bot.admin_identity: {e}")))?,
        max_threads: max_threads as usize,
        queue_size: queue_size as usize,
        listen_only_admin: require(bot.listen_only_admin, "bot.listen_only_admin")?,
        notify_admin_on_startup: require(
            bot.notify_admin_on_startup,
            "bot.notify_admin_on_startup",
        )?,
        watch_config: bot.watch_config,
    })
}

fn validate_command(index: usize, entry: CommandEntry) -> Result<CommandSpec, CoreError> {
    let name = require(entry.cmd, &format!("cmds[{index}].cmd"))?;
    let script = require(entry.script, &format!("cmds[{index}].script"))?;

    let mut spec = CommandSpec::new(&name, script)
        .map_err(|e| CoreError::Config(format!("cmds[{index}]: {e}")))?
        .with_description(entry.description)
        .with_output(entry.output)
        .with_stderr(entry.capture_stderr)
        .with_args_allowed(entry.allow_args);

    if let Some(exec_type) = entry.exec_type.filter(|s| !s.trim().is_empty()) {
        spec = spec.with_exec_type(exec_type);
    }
    if let Some(secs) = entry.timeout_secs {
        if secs == 0 {
            return Err(CoreError::Config(format!(
                "cmds[{index}].timeout_secs must be at least 1"
            )));
        }
        spec = spec.with_timeout(Duration::from_secs(secs));
    }
    Ok(spec)
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Where the configuration lives: a store directory holding `config.json`
/// and any state the messenger persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    store_dir: PathBuf,
}

impl ConfigSource {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
        }
    }

    /// Resolve the store directory from a command-line argument, falling
    /// back to [`STORE_DIR_ENV`].
    pub fn resolve(arg: Option<String>) -> Result<Self, CoreError> {
        arg.filter(|a| !a.trim().is_empty())
            .or_else(|| std::env::var(STORE_DIR_ENV).ok())
            .map(Self::new)
            .ok_or_else(|| {
                CoreError::Config(format!(
                    "No store directory given (pass it as the first argument or set {STORE_DIR_ENV})"
                ))
            })
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.store_dir.join(CONFIG_FILE_NAME)
    }

    /// Read and validate the configuration file.
    pub async fn load(&self) -> Result<AgentConfig, CoreError> {
        let path = self.config_path();
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| CoreError::Io {
                path: path.clone(),
                source,
            })?;
        let config = AgentConfig::parse(&text)?;
        tracing::info!(
            path = %path.display(),
            commands = config.commands.len(),
            "Configuration loaded",
        );
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const VALID: &str = r#"{
        "bot": {
            "identity": "bot@example.org",
            "admin_identity": "Admin@Example.org",
            "max_threads": 4,
            "queue_size": "16",
            "listen_only_admin": true,
            "notify_admin_on_startup": false
        },
        "cmds": [
            { "cmd": "backup", "script": "/usr/bin/backup.sh", "exec_type": "bash",
              "description": "Nightly backup", "output": "collect", "timeout_secs": 600 },
            { "cmd": "uptime", "script": "/usr/bin/uptime" }
        ]
    }"#;

    #[test]
    fn parses_valid_config() {
        let config = AgentConfig::parse(VALID).expect("valid config");
        assert_eq!(config.bot.max_threads, 4);
        assert_eq!(config.bot.queue_size, 16);
        assert_eq!(config.bot.admin_identity.as_str(), "admin@example.org");
        assert!(config.bot.listen_only_admin);
        assert!(config.bot.watch_config);

        let backup = &config.commands[0];
        assert_eq!(backup.exec_type.as_deref(), Some("bash"));
        assert_eq!(backup.output, OutputPolicy::Collect);
        assert_eq!(backup.timeout, Some(Duration::from_secs(600)));

        let uptime = &config.commands[1];
        assert_eq!(uptime.output, OutputPolicy::Stream);
        assert!(uptime.timeout.is_none());
        assert!(!uptime.allow_args);
    }

    #[test]
    fn missing_bot_section_is_config_error() {
        let err = AgentConfig::parse(r#"{ "cmds": [] }"#).unwrap_err();
        assert_matches!(err, CoreError::Config(msg) if msg.contains("bot"));
    }

    #[test]
    fn missing_required_bot_field() {
        let text = VALID.replace(r#""listen_only_admin": true,"#, "");
        let err = AgentConfig::parse(&text).unwrap_err();
        assert_matches!(err, CoreError::Config(msg) if msg.contains("listen_only_admin"));
    }

    #[test]
    fn zero_threads_rejected() {
        let text = VALID.replace(r#""max_threads": 4"#, r#""max_threads": 0"#);
        let err = AgentConfig::parse(&text).unwrap_err();
        assert_matches!(err, CoreError::Config(msg) if msg.contains("max_threads"));
    }

    #[test]
    fn non_numeric_queue_size_rejected() {
        let text = VALID.replace(r#""queue_size": "16""#, r#""queue_size": "lots""#);
        assert_matches!(AgentConfig::parse(&text), Err(CoreError::Config(_)));
    }

    #[test]
    fn command_without_script_rejected() {
        let text = VALID.replace(r#""script": "/usr/bin/uptime""#, r#""description": "x""#);
        let err = AgentConfig::parse(&text).unwrap_err();
        assert_matches!(err, CoreError::Config(msg) if msg.contains("cmds[1].script"));
    }

    #[test]
    fn invalid_command_name_rejected() {
        let text = VALID.replace(r#""cmd": "uptime""#, r#""cmd": "up time""#);
        assert_matches!(AgentConfig::parse(&text), Err(CoreError::Config(_)));
    }

    #[test]
    fn malformed_json_is_config_error() {
        assert_matches!(AgentConfig::parse("{ not json"), Err(CoreError::Config(_)));
    }

    #[test]
    fn duplicates_skipped_in_registry() {
        let text = VALID.replace(r#""cmd": "uptime""#, r#""cmd": "BACKUP""#);
        let config = AgentConfig::parse(&text).expect("valid config");
        let registry = config.build_registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("backup").expect("kept").script_path,
            "/usr/bin/backup.sh"
        );
    }

    #[tokio::test]
    async fn load_reads_config_from_store_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), VALID).expect("write config");

        let source = ConfigSource::new(dir.path());
        let config = source.load().await.expect("load");
        assert_eq!(config.commands.len(), 2);
    }

    #[tokio::test]
    async fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = ConfigSource::new(dir.path());
        assert_matches!(source.load().await, Err(CoreError::Io { .. }));
    }

    #[test]
    fn resolve_prefers_argument() {
        let source = ConfigSource::resolve(Some("/srv/relay".to_string())).expect("resolved");
        assert_eq!(source.config_path(), PathBuf::from("/srv/relay/config.json"));
    }
}
