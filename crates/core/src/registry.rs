//! Capability registry: the authoritative mapping from extensions to the
//! event categories they receive and the mutation scopes they are granted.
//!
//! Reads happen on the dispatch hot path, so the registry keeps its state in
//! an immutable snapshot behind an atomically swapped `Arc`. Registration and
//! unregistration build a fresh snapshot and swap it in; in-flight dispatch
//! keeps working against the snapshot it already holds and never observes a
//! partial update.

use crate::error::BridgeError;
use crate::event::EventCategory;
use crate::listener::ExtensionListener;
use crate::subject::CapabilitySet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One of the two extension API surfaces hosted by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ecosystem {
    /// Bukkit-style plugin API.
    PluginApi,
    /// Forge-style mod API.
    ModApi,
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PluginApi => f.write_str("plugin"),
            Self::ModApi => f.write_str("mod"),
        }
    }
}

/// Unique identity of an extension: name plus version.
///
/// Names are unique across both ecosystems; registering a second extension
/// under an existing name is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionIdentity {
    pub name: String,
    pub version: semver::Version,
}

impl ExtensionIdentity {
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ExtensionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Descriptor of a registered extension.
///
/// Created by [`CapabilityRegistry::register`], referenced (never owned) by
/// the dispatch scheduler, and discarded when the extension is unregistered.
#[derive(Debug)]
pub struct ExtensionHandle {
    pub identity: ExtensionIdentity,
    pub ecosystem: Ecosystem,
    pub subscriptions: Vec<EventCategory>,
    pub capabilities: CapabilitySet,
}

impl ExtensionHandle {
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Whether the extension subscribed to the given category.
    pub fn subscribes_to(&self, category: EventCategory) -> bool {
        self.subscriptions.contains(&category)
    }
}

/// An extension as handed to the registry by the loading collaborator.
///
/// Built with [`Extension::plugin`] or [`Extension::mod_api`] and the
/// `with_*` builders, then passed to [`CapabilityRegistry::register`].
pub struct Extension {
    identity: ExtensionIdentity,
    ecosystem: Ecosystem,
    subscriptions: Vec<EventCategory>,
    capabilities: CapabilitySet,
    listener: ExtensionListener,
}

impl Extension {
    /// Declare a PluginAPI-ecosystem extension.
    pub fn plugin(
        name: impl Into<String>,
        version: semver::Version,
        listener: Arc<dyn crate::listener::PluginListener>,
    ) -> Self {
        Self {
            identity: ExtensionIdentity::new(name, version),
            ecosystem: Ecosystem::PluginApi,
            subscriptions: EventCategory::all().to_vec(),
            capabilities: CapabilitySet::allow_all(),
            listener: ExtensionListener::Plugin(listener),
        }
    }

    /// Declare a ModAPI-ecosystem extension.
    pub fn mod_api(
        name: impl Into<String>,
        version: semver::Version,
        listener: Arc<dyn crate::listener::ModListener>,
    ) -> Self {
        Self {
            identity: ExtensionIdentity::new(name, version),
            ecosystem: Ecosystem::ModApi,
            subscriptions: EventCategory::all().to_vec(),
            capabilities: CapabilitySet::allow_all(),
            listener: ExtensionListener::Mod(listener),
        }
    }

    /// Restrict the subscribed event categories (default: all).
    pub fn with_subscriptions(mut self, categories: Vec<EventCategory>) -> Self {
        self.subscriptions = categories;
        self
    }

    /// Restrict the granted mutation scope (default: allow all).
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// A registered extension inside a snapshot: descriptor plus listener.
#[derive(Clone)]
pub struct RegisteredExtension {
    pub handle: Arc<ExtensionHandle>,
    pub listener: ExtensionListener,
    /// Registration sequence; dispatch order within an ecosystem.
    pub order: u64,
}

impl fmt::Debug for RegisteredExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredExtension")
            .field("handle", &self.handle)
            .field("order", &self.order)
            .finish()
    }
}

/// Immutable view of every registered extension at one instant.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    by_name: HashMap<String, Arc<RegisteredExtension>>,
    plugin_order: Vec<Arc<RegisteredExtension>>,
    mod_order: Vec<Arc<RegisteredExtension>>,
    epoch: u64,
}

impl RegistrySnapshot {
    /// Registered extensions of one ecosystem, in registration order.
    pub fn listeners(&self, ecosystem: Ecosystem) -> &[Arc<RegisteredExtension>] {
        match ecosystem {
            Ecosystem::PluginApi => &self.plugin_order,
            Ecosystem::ModApi => &self.mod_order,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RegisteredExtension>> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Monotonic snapshot generation; bumps on every register/unregister.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Authoritative extension -> permission mapping.
///
/// All queries are reads off an immutable snapshot; `register` and
/// `unregister` produce a new snapshot and swap it atomically, so the read
/// path never takes a write lock and never blocks behind registration.
pub struct CapabilityRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    next_order: AtomicU64,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
            next_order: AtomicU64::new(0),
        }
    }

    /// Register an extension, failing if the identity already exists.
    pub fn register(&self, extension: Extension) -> Result<Arc<ExtensionHandle>, BridgeError> {
        let mut guard = self.snapshot.write();
        if guard.contains(&extension.identity.name) {
            return Err(BridgeError::DuplicateIdentity(extension.identity.name));
        }

        let handle = Arc::new(ExtensionHandle {
            identity: extension.identity,
            ecosystem: extension.ecosystem,
            subscriptions: extension.subscriptions,
            capabilities: extension.capabilities,
        });
        let registered = Arc::new(RegisteredExtension {
            handle: handle.clone(),
            listener: extension.listener,
            order: self.next_order.fetch_add(1, Ordering::Relaxed),
        });

        let mut next = Self::clone_snapshot(&guard);
        next.by_name
            .insert(handle.name().to_string(), registered.clone());
        match handle.ecosystem {
            Ecosystem::PluginApi => next.plugin_order.push(registered),
            Ecosystem::ModApi => next.mod_order.push(registered),
        }
        *guard = Arc::new(next);

        tracing::info!(
            extension = %handle.identity,
            ecosystem = %handle.ecosystem,
            "registered extension"
        );
        Ok(handle)
    }

    /// Remove an extension by name. Idempotent: returns `false` (and does
    /// nothing) if the name is already absent.
    pub fn unregister(&self, name: &str) -> bool {
        let mut guard = self.snapshot.write();
        if !guard.contains(name) {
            return false;
        }

        let mut next = Self::clone_snapshot(&guard);
        next.by_name.remove(name);
        next.plugin_order.retain(|e| e.handle.name() != name);
        next.mod_order.retain(|e| e.handle.name() != name);
        *guard = Arc::new(next);

        tracing::info!(extension = name, "unregistered extension");
        true
    }

    /// Wait-free view of the current registration state.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().clone()
    }

    /// Whether the handle is still registered and subscribed to `category`.
    pub fn is_permitted(&self, handle: &ExtensionHandle, category: EventCategory) -> bool {
        self.snapshot().contains(handle.name()) && handle.subscribes_to(category)
    }

    /// The mutation scope currently granted to the handle, if registered.
    pub fn granted_scope(&self, handle: &ExtensionHandle) -> Option<CapabilitySet> {
        self.snapshot()
            .get(handle.name())
            .map(|e| e.handle.capabilities.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains(name)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn clone_snapshot(current: &Arc<RegistrySnapshot>) -> RegistrySnapshot {
        RegistrySnapshot {
            by_name: current.by_name.clone(),
            plugin_order: current.plugin_order.clone(),
            mod_order: current.mod_order.clone(),
            epoch: current.epoch + 1,
        }
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
