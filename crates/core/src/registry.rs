//! Command registry and its reloadable shared handle.
//!
//! [`CommandRegistry`] is an immutable name-to-spec map built once from
//! configuration. [`RegistryHandle`] holds the current registry behind an
//! `Arc` so a reload can build a fresh registry and swap it in atomically
//! while in-flight invocations keep the `CommandSpec` they started with.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::command::CommandSpec;

/// Name-ordered mapping from command name to its spec.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<CommandSpec>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from specs in configuration order.
    ///
    /// Returns the registry plus the names of any duplicates that were
    /// skipped (the first occurrence wins).
    pub fn from_specs(specs: impl IntoIterator<Item = CommandSpec>) -> (Self, Vec<String>) {
        let mut registry = Self::new();
        let mut duplicates = Vec::new();
        for spec in specs {
            let name = spec.name.clone();
            if !registry.insert(spec) {
                duplicates.push(name);
            }
        }
        (registry, duplicates)
    }

    /// Insert a spec. Returns `false` (and keeps the existing entry) if a
    /// command with the same name is already registered.
    pub fn insert(&mut self, spec: CommandSpec) -> bool {
        let key = spec.name.to_ascii_lowercase();
        if self.commands.contains_key(&key) {
            return false;
        }
        self.commands.insert(key, Arc::new(spec));
        true
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<Arc<CommandSpec>> {
        self.commands.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Human-readable listing, one command per line.
    pub fn render_listing(&self) -> String {
        if self.commands.is_empty() {
            return "(no commands registered)\n".to_string();
        }
        let mut out = String::new();
        for spec in self.commands.values() {
            out.push_str(&spec.listing_line());
            out.push('\n');
        }
        out
    }
}

/// Shared, atomically replaceable reference to the current registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryHandle {
    current: Arc<RwLock<Arc<CommandRegistry>>>,
}

impl RegistryHandle {
    pub fn new(registry: CommandRegistry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// The registry as of now. Holding the snapshot does not block reloads.
    pub async fn snapshot(&self) -> Arc<CommandRegistry> {
        Arc::clone(&*self.current.read().await)
    }

    /// Swap in a new registry, returning the previous one.
    pub async fn replace(&self, registry: CommandRegistry) -> Arc<CommandRegistry> {
        let mut guard = self.current.write().await;
        std::mem::replace(&mut *guard, Arc::new(registry))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
