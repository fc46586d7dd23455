//! Built-in administrator operations.
//!
//! A closed catalogue: every operation has a fixed name, a usage string
//! and an argument [`Arity`] that is checked before it runs. Names are
//! matched case-insensitively.

use crate::dispatch::DispatchError;

/// Argument contract of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Anything, including nothing.
    Any,
    /// No arguments.
    Zero,
    /// Exactly one argument with no embedded whitespace.
    One,
    /// At least `n` whitespace-separated arguments. The last one takes the
    /// remainder of the line.
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, rest: Option<&str>) -> bool {
        let rest = rest.map(str::trim).filter(|r| !r.is_empty());
        match (self, rest) {
            (Self::Any, _) => true,
            (Self::Zero, rest) => rest.is_none(),
            (Self::One, Some(arg)) => !arg.contains(char::is_whitespace),
            (Self::One, None) => false,
            (Self::AtLeast(n), Some(args)) => args.split_whitespace().count() >= *n,
            (Self::AtLeast(n), None) => *n == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminOperation {
    Help,
    Send,
    Chat,
    Close,
    List,
    Trust,
    Distrust,
    Clear,
    Regenerate,
    Fingerprint,
    Which,
    Commands,
    Reload,
    Exec,
    Quit,
}

impl AdminOperation {
    /// Every operation in help-listing order.
    pub const ALL: [AdminOperation; 15] = [
        Self::Help,
        Self::Send,
        Self::Chat,
        Self::Close,
        Self::List,
        Self::Trust,
        Self::Distrust,
        Self::Clear,
        Self::Regenerate,
        Self::Fingerprint,
        Self::Which,
        Self::Commands,
        Self::Reload,
        Self::Exec,
        Self::Quit,
    ];

    /// Resolve a typed name such as `/Chat`. `/quit` is an alias of `/q`.
    pub fn lookup(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name == "/quit" {
            return Some(Self::Quit);
        }
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Help => "/help",
            Self::Send => "/send",
            Self::Chat => "/chat",
            Self::Close => "/close",
            Self::List => "/list",
            Self::Trust => "/trust",
            Self::Distrust => "/distrust",
            Self::Clear => "/clear",
            Self::Regenerate => "/regenerate",
            Self::Fingerprint => "/fingerprint",
            Self::Which => "/which",
            Self::Commands => "/commands",
            Self::Reload => "/reload",
            Self::Exec => "/exec",
            Self::Quit => "/q",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Self::Help | Self::List => Arity::Any,
            Self::Chat | Self::Trust | Self::Distrust => Arity::One,
            Self::Send => Arity::AtLeast(2),
            Self::Exec => Arity::AtLeast(1),
            Self::Close
            | Self::Clear
            | Self::Regenerate
            | Self::Fingerprint
            | Self::Which
            | Self::Commands
            | Self::Reload
            | Self::Quit => Arity::Zero,
        }
    }

    /// Call form, e.g. `/send <identity> <message>`.
    pub fn syntax(&self) -> &'static str {
        match self {
            Self::Help => "/help",
            Self::Send => "/send <identity> <message>",
            Self::Chat => "/chat <identity>",
            Self::Close => "/close",
            Self::List => "/list [identity...]",
            Self::Trust => "/trust <identity>",
            Self::Distrust => "/distrust <identity>",
            Self::Clear => "/clear",
            Self::Regenerate => "/regenerate",
            Self::Fingerprint => "/fingerprint",
            Self::Which => "/which",
            Self::Commands => "/commands",
            Self::Reload => "/reload",
            Self::Exec => "/exec <command> [args]",
            Self::Quit => "/q",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Help => "Show this help",
            Self::Send => "Send a message to an identity",
            Self::Chat => "Open a chat; plain lines are sent to it",
            Self::Close => "Close the open chat",
            Self::List => "List known devices and their trust state",
            Self::Trust => "Trust all devices of an identity",
            Self::Distrust => "Distrust all devices of an identity",
            Self::Clear => "Forget cached device state",
            Self::Regenerate => "Generate new keys for this agent",
            Self::Fingerprint => "Show this agent's identity and fingerprint",
            Self::Which => "Show the open chat",
            Self::Commands => "List registered script commands",
            Self::Reload => "Reload the configuration file",
            Self::Exec => "Run a registered script command",
            Self::Quit => "Shut down (alias /quit)",
        }
    }

    /// Fixed-width usage line.
    pub fn usage(&self) -> String {
        format!("{:<30}{}", self.syntax(), self.description())
    }

    /// Validate the argument string against [`Self::arity`].
    pub fn check_args(&self, rest: Option<&str>) -> Result<(), DispatchError> {
        if self.arity().accepts(rest) {
            Ok(())
        } else {
            Err(DispatchError::Usage {
                command: self.name().to_string(),
                usage: self.syntax().to_string(),
            })
        }
    }

    /// Help text listing every operation.
    pub fn help_text() -> String {
        let mut out = String::from("Available operations:\n");
        for op in Self::ALL {
            out.push_str(&op.usage());
            out.push('\n');
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
