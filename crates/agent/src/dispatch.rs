//! Routes a line of text to a built-in operation, a registered script, or
//! the open chat.
//!
//! Two entry points share one registry and one pool:
//!
//! - [`CommandDispatcher::dispatch_local`] for administrator console
//!   lines: built-in operation, then open chat (the whole line is
//!   forwarded), then script lookup, then "not found".
//! - [`CommandDispatcher::dispatch_remote`] for messages from peers:
//!   listen-only filter, then script lookup, then `help`, then "not
//!   found" with the list of commands.
//!
//! Both are safe to call concurrently.

use std::sync::Arc;

use scriptrelay_core::{
    CommandRegistry, CoreError, ExecutionPool, Identity, Invocation, InvocationHandle,
    MessengerError, Outbox, ReplyTarget, RegistryHandle, SubmitError, TrustState,
};

use crate::admin::AdminOperation;
use crate::reload::ConfigReloader;
use crate::session::SessionState;

/// Caller-facing dispatch errors. Rendered as text, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Wrong arguments for {command}. Usage: {usage}")]
    Usage { command: String, usage: String },

    #[error("Unknown command: {0}")]
    NotFound(String),

    #[error("The command {0} does not accept arguments")]
    ArgumentsNotAccepted(String),

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error(transparent)]
    Config(#[from] CoreError),
}

/// What a dispatch call did.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Blank input.
    Empty,
    /// A built-in operation ran.
    Builtin(AdminOperation),
    /// `/q` was requested; the caller runs the shutdown sequence.
    Quit,
    /// A script invocation was accepted by the pool.
    Submitted {
        command: String,
        handle: InvocationHandle,
    },
    /// The pool refused the invocation.
    Rejected { command: String, error: SubmitError },
    /// The line was sent to the open chat.
    Forwarded { to: Identity },
    /// The list of commands was sent in reply to `help`.
    CommandList,
    /// Nothing matched.
    NotFound { name: String },
    /// An operation failed; the error was reported to the caller.
    Failed(DispatchError),
    /// A remote message was dropped by the listen-only filter.
    Ignored { from: Identity },
}

/// Split a line on its first whitespace into `(name, rest)`.
///
/// `rest` is `None` when there is no whitespace, otherwise the trimmed
/// remainder. Returns `None` for a blank line.
pub fn parse_line(line: &str) -> Option<(&str, Option<&str>)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((name, rest)) => Some((name, Some(rest.trim()))),
        None => Some((line, None)),
    }
}

pub struct CommandDispatcher {
    session: Arc<SessionState>,
    registry: RegistryHandle,
    pool: Arc<ExecutionPool>,
    outbox: Outbox,
    reloader: Arc<ConfigReloader>,
}

impl CommandDispatcher {
    pub fn new(
        session: Arc<SessionState>,
        registry: RegistryHandle,
        pool: Arc<ExecutionPool>,
        outbox: Outbox,
        reloader: Arc<ConfigReloader>,
    ) -> Self {
        Self {
            session,
            registry,
            pool,
            outbox,
            reloader,
        }
    }

    // ---- local (administrator console) ----

    /// Handle one line typed by the administrator.
    pub async fn dispatch_local(&self, line: &str) -> DispatchOutcome {
        let Some((name, rest)) = parse_line(line) else {
            return DispatchOutcome::Empty;
        };

        if let Some(op) = AdminOperation::lookup(name) {
            return match self.run_builtin(op, rest).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.outbox.print(&e.to_string());
                    DispatchOutcome::Failed(e)
                }
            };
        }

        if let Some(peer) = self.session.open_chat().await {
            return match self.outbox.send(&peer, line.trim()).await {
                Ok(()) => DispatchOutcome::Forwarded { to: peer },
                Err(e) => DispatchOutcome::Failed(e.into()),
            };
        }

        let registry = self.registry.snapshot().await;
        if registry.contains(name) {
            return self
                .submit_script(&registry, name, rest, ReplyTarget::Console)
                .await;
        }

        self.outbox.print(&format!(
            "Error: Don't know the command {name}.\n{}",
            commands_text(&registry)
        ));
        DispatchOutcome::NotFound {
            name: name.to_string(),
        }
    }

    // ---- remote (authenticated peer) ----

    /// Handle one message received from `from`.
    pub async fn dispatch_remote(&self, from: &Identity, body: &str) -> DispatchOutcome {
        if !self.session.accepts_from(from) {
            tracing::info!(from = %from, "Ignoring message from non-admin peer");
            return DispatchOutcome::Ignored { from: from.clone() };
        }

        let Some((name, rest)) = parse_line(body) else {
            return DispatchOutcome::Empty;
        };
        let name = name.to_lowercase();
        let reply_to = ReplyTarget::Remote(from.clone());
        let registry = self.registry.snapshot().await;

        tracing::info!(from = %from, command = %name, "Remote command received");

        if registry.contains(&name) {
            return self.submit_script(&registry, &name, rest, reply_to).await;
        }

        if name == "help" {
            self.outbox
                .deliver(&reply_to, &commands_text(&registry))
                .await;
            return DispatchOutcome::CommandList;
        }

        self.outbox
            .deliver(
                &reply_to,
                &format!("This command doesn't exist.\n{}", commands_text(&registry)),
            )
            .await;
        DispatchOutcome::NotFound { name }
    }

    // ---- script path ----

    async fn submit_script(
        &self,
        registry: &CommandRegistry,
        name: &str,
        rest: Option<&str>,
        reply_to: ReplyTarget,
    ) -> DispatchOutcome {
        let Some(spec) = registry.get(name) else {
            let err = DispatchError::NotFound(name.to_string());
            self.outbox.deliver(&reply_to, &err.to_string()).await;
            return DispatchOutcome::NotFound {
                name: name.to_string(),
            };
        };

        let args: Vec<String> = rest
            .map(|r| r.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        if !args.is_empty() && !spec.allow_args {
            let err = DispatchError::ArgumentsNotAccepted(spec.name.clone());
            self.outbox.deliver(&reply_to, &err.to_string()).await;
            return DispatchOutcome::Failed(err);
        }

        let command = spec.name.clone();
        let invocation = Invocation::new(spec, args, reply_to.clone());
        match self.pool.submit(invocation).await {
            Ok(handle) => {
                self.outbox
                    .print(&format!("Executing {command} (for {reply_to})"));
                DispatchOutcome::Submitted { command, handle }
            }
            Err(error) => {
                let text = match &error {
                    SubmitError::AlreadyRunning(_) => format!(
                        "The command {command} is already running. Please try again later."
                    ),
                    SubmitError::ShuttingDown => {
                        format!("Cannot run {command}: the agent is shutting down.")
                    }
                };
                self.outbox.deliver(&reply_to, &text).await;
                DispatchOutcome::Rejected { command, error }
            }
        }
    }

    // ---- built-in operations ----

    async fn run_builtin(
        &self,
        op: AdminOperation,
        rest: Option<&str>,
    ) -> Result<DispatchOutcome, DispatchError> {
        op.check_args(rest)?;
        let rest = rest.unwrap_or_default();
        let messenger = self.outbox.messenger();

        match op {
            AdminOperation::Help => self.outbox.print(&AdminOperation::help_text()),
            AdminOperation::Send => {
                let (target, message) = rest
                    .split_once(char::is_whitespace)
                    .map(|(t, m)| (t, m.trim()))
                    .unwrap_or((rest, ""));
                let to = messenger.resolve_identity(target).await?;
                self.outbox.send(&to, message).await?;
            }
            AdminOperation::Chat => {
                let peer = messenger.resolve_identity(rest).await?;
                self.session.set_open_chat(peer.clone()).await;
                tracing::info!(peer = %peer, "Chat opened");
                self.outbox.print(&format!(
                    "Chat opened with {peer}. Lines that are not commands are sent there."
                ));
            }
            AdminOperation::Close => match self.session.close_chat().await {
                Some(peer) => self.outbox.print(&format!("Closed chat with {peer}.")),
                None => self.outbox.print("No chat is open."),
            },
            AdminOperation::List => {
                let devices = if rest.is_empty() {
                    messenger.list_peers(None).await?
                } else {
                    let mut devices = Vec::new();
                    for name in rest.split_whitespace() {
                        let identity = messenger.resolve_identity(name).await?;
                        devices.extend(messenger.list_peers(Some(&identity)).await?);
                    }
                    devices
                };
                self.outbox.print(&render_devices(&devices));
            }
            AdminOperation::Trust | AdminOperation::Distrust => {
                let state = if op == AdminOperation::Trust {
                    TrustState::Trusted
                } else {
                    TrustState::Untrusted
                };
                let identity = messenger.resolve_identity(rest).await?;
                let updated = messenger.set_trust(&identity, state).await?;
                tracing::info!(identity = %identity, trust = state.as_str(), updated, "Trust updated");
                self.outbox.print(&format!(
                    "Marked {updated} device(s) of {identity} as {}.",
                    state.as_str()
                ));
            }
            AdminOperation::Clear => {
                messenger.clear_device_list().await?;
                self.outbox.print("Device list cleared.");
            }
            AdminOperation::Regenerate => {
                let own = messenger.regenerate_keys().await?;
                tracing::warn!(device_id = own.device_id, "Keys regenerated");
                self.outbox.print(&format!(
                    "New keys generated.\nDevice: {}\nFingerprint: {}",
                    own.device_id, own.fingerprint
                ));
            }
            AdminOperation::Fingerprint => {
                let own = messenger.own_identity().await?;
                self.outbox.print(&format!(
                    "Identity: {}\nDevice: {}\nFingerprint: {}",
                    own.identity, own.device_id, own.fingerprint
                ));
            }
            AdminOperation::Which => match self.session.open_chat().await {
                Some(peer) => self.outbox.print(&format!("Chatting with {peer}.")),
                None => self.outbox.print("No chat is open."),
            },
            AdminOperation::Commands => {
                let registry = self.registry.snapshot().await;
                self.outbox.print(&commands_text(&registry));
            }
            AdminOperation::Reload => {
                let count = self.reloader.reload().await?;
                self.outbox
                    .print(&format!("Configuration reloaded: {count} command(s)."));
            }
            AdminOperation::Exec => {
                let Some((name, args)) = parse_line(rest) else {
                    return Err(DispatchError::Usage {
                        command: op.name().to_string(),
                        usage: op.syntax().to_string(),
                    });
                };
                let registry = self.registry.snapshot().await;
                if !registry.contains(name) {
                    return Err(DispatchError::NotFound(name.to_string()));
                }
                return Ok(self
                    .submit_script(&registry, name, args, ReplyTarget::Console)
                    .await);
            }
            AdminOperation::Quit => return Ok(DispatchOutcome::Quit),
        }

        Ok(DispatchOutcome::Builtin(op))
    }
}

/// "These commands are available:" followed by the registry listing.
pub fn commands_text(registry: &CommandRegistry) -> String {
    format!("These commands are available:\n{}", registry.render_listing())
}

fn render_devices(devices: &[scriptrelay_core::PeerDevice]) -> String {
    if devices.is_empty() {
        return "No known devices.".to_string();
    }
    let mut out = String::new();
    for device in devices {
        out.push_str(&format!(
            "{:<30}{:<12}{:<12}{}\n",
            device.identity.as_str(),
            device.device_id,
            device.trust.as_str(),
            device.fingerprint
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_without_whitespace_has_no_rest() {
        assert_eq!(parse_line("backup"), Some(("backup", None)));
    }

    #[test]
    fn parse_splits_on_first_whitespace() {
        assert_eq!(
            parse_line("/send alice@x  hello world  "),
            Some(("/send", Some("alice@x  hello world")))
        );
    }

    #[test]
    fn parse_trailing_space_gives_empty_rest() {
        assert_eq!(parse_line("/q "), Some(("/q", None)));
        assert_eq!(parse_line("/q\t x"), Some(("/q", Some("x"))));
    }

    #[test]
    fn parse_blank_line() {
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn usage_error_message_names_call_form() {
        let err = DispatchError::Usage {
            command: "/chat".to_string(),
            usage: "/chat <identity>".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Wrong arguments for /chat. Usage: /chat <identity>"
        );
    }
}
