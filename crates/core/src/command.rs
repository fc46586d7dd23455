//! Script command definitions.
//!
//! A [`CommandSpec`] describes one remotely-triggerable script: the name a
//! caller types, the executable to launch, an optional interpreter prefix,
//! and how its standard output is delivered back.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum length of a command name.
const MAX_NAME_LEN: usize = 64;

/// How a script's standard output reaches the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPolicy {
    /// Every output line is forwarded as soon as it is read.
    #[default]
    Stream,
    /// Lines are buffered and forwarded as one message after exit.
    Collect,
}

impl OutputPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Collect => "collect",
        }
    }
}

/// An executable registered under a command name.
///
/// Immutable once loaded; a configuration reload replaces the whole set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Lower-cased command name (lookup is case-insensitive).
    pub name: String,
    /// Path to the script or binary.
    pub script_path: String,
    /// Interpreter placed before the script path, e.g. `bash` or `python3`.
    pub exec_type: Option<String>,
    /// Human-readable description shown in command listings.
    pub description: String,
    pub output: OutputPolicy,
    /// Kill the process if it runs longer than this. `None` = no limit.
    pub timeout: Option<Duration>,
    /// Merge standard error into the delivered output.
    pub capture_stderr: bool,
    /// Whether callers may append arguments after the command name.
    pub allow_args: bool,
}

impl CommandSpec {
    /// Create a spec with default options (stream output, no timeout,
    /// stdout only, no caller arguments).
    pub fn new(name: &str, script_path: impl Into<String>) -> Result<Self, CoreError> {
        validate_command_name(name)?;
        let script_path = script_path.into();
        if script_path.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Command '{name}' has an empty script path"
            )));
        }
        Ok(Self {
            name: name.to_ascii_lowercase(),
            script_path,
            exec_type: None,
            description: String::new(),
            output: OutputPolicy::Stream,
            timeout: None,
            capture_stderr: false,
            allow_args: false,
        })
    }

    pub fn with_exec_type(mut self, exec_type: impl Into<String>) -> Self {
        self.exec_type = Some(exec_type.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_output(mut self, output: OutputPolicy) -> Self {
        self.output = output;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stderr(mut self, capture: bool) -> Self {
        self.capture_stderr = capture;
        self
    }

    pub fn with_args_allowed(mut self, allow: bool) -> Self {
        self.allow_args = allow;
        self
    }

    /// Build the process argument vector: `[exec_type] script_path args...`.
    ///
    /// The first element is the program to launch.
    pub fn argv(&self, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        if let Some(exec_type) = &self.exec_type {
            argv.push(exec_type.clone());
        }
        argv.push(self.script_path.clone());
        argv.extend(args.iter().cloned());
        argv
    }

    /// One line for command listings: name, description, output policy.
    pub fn listing_line(&self) -> String {
        format!(
            "{:<25}{:<40}{}",
            self.name,
            self.description,
            self.output.as_str()
        )
    }
}

/// Validate a command name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
///
/// Names starting with `/` are reserved for built-in operations and are
/// rejected by the character rule.
pub fn validate_command_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Command name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Command name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(format!(
            "Command name '{name}' may only contain alphanumeric, hyphen, underscore, or dot characters"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_command_names() {
        assert!(validate_command_name("backup").is_ok());
        assert!(validate_command_name("disk-usage").is_ok());
        assert!(validate_command_name("restart_web.1").is_ok());
    }

    #[test]
    fn unsafe_command_names() {
        assert!(validate_command_name("").is_err());
        assert!(validate_command_name("/help").is_err());
        assert!(validate_command_name("foo bar").is_err());
        assert!(validate_command_name("$(evil)").is_err());
        assert!(validate_command_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn name_is_lowercased() {
        let spec = CommandSpec::new("Backup", "/usr/bin/backup.sh").expect("valid spec");
        assert_eq!(spec.name, "backup");
    }

    #[test]
    fn empty_script_path_rejected() {
        assert!(CommandSpec::new("backup", "  ").is_err());
    }

    #[test]
    fn argv_without_interpreter() {
        let spec = CommandSpec::new("backup", "/usr/bin/backup.sh").expect("valid spec");
        assert_eq!(spec.argv(&[]), vec!["/usr/bin/backup.sh".to_string()]);
    }

    #[test]
    fn argv_with_interpreter_and_args() {
        let spec = CommandSpec::new("report", "/opt/report.py")
            .expect("valid spec")
            .with_exec_type("python3");
        let argv = spec.argv(&["--since".to_string(), "7d".to_string()]);
        assert_eq!(argv, vec!["python3", "/opt/report.py", "--since", "7d"]);
    }

    #[test]
    fn output_policy_deserializes_lowercase() {
        let policy: OutputPolicy = serde_json::from_str("\"collect\"").expect("valid policy");
        assert_eq!(policy, OutputPolicy::Collect);
        assert!(serde_json::from_str::<OutputPolicy>("\"buffered\"").is_err());
    }
}
