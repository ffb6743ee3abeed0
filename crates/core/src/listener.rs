//! Listener contracts for the two hosted ecosystems, plus the notification
//! types through which the bridge reports back to extensions and operators.
//!
//! Each ecosystem's listener contract is a capability interface rather than a
//! base class: an extension implements exactly one of the two traits and only
//! ever sees its own ecosystem's view of an event.

use crate::proposal::ProposalSink;
use crate::registry::{Ecosystem, ExtensionIdentity};
use crate::resolve::RejectReason;
use crate::subject::{SubjectRef, SubjectValue};
use crate::translate::{ModView, PluginView};
use std::fmt;
use std::sync::Arc;

/// Callback contract for PluginAPI-ecosystem extensions.
///
/// Callbacks run on the blocking worker pool and may block, subject to the
/// configured per-listener timeout. A returned error is recorded as a fault
/// against the extension and never interrupts other listeners.
pub trait PluginListener: Send + Sync {
    /// Handle one translated event, optionally submitting mutation proposals.
    fn on_event(&self, view: &PluginView, sink: &ProposalSink) -> anyhow::Result<()>;

    /// Receive a bridge notification (rejected mutation, unregistration).
    fn on_notification(&self, _notification: &ExtensionNotification) {}
}

/// Callback contract for ModAPI-ecosystem extensions.
pub trait ModListener: Send + Sync {
    /// Handle one translated event, optionally submitting mutation proposals.
    fn on_event(&self, view: &ModView, sink: &ProposalSink) -> anyhow::Result<()>;

    /// Receive a bridge notification (rejected mutation, unregistration).
    fn on_notification(&self, _notification: &ExtensionNotification) {}
}

/// A registered listener, tagged by ecosystem.
#[derive(Clone)]
pub enum ExtensionListener {
    Plugin(Arc<dyn PluginListener>),
    Mod(Arc<dyn ModListener>),
}

impl ExtensionListener {
    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            Self::Plugin(_) => Ecosystem::PluginApi,
            Self::Mod(_) => Ecosystem::ModApi,
        }
    }

    /// Deliver a notification regardless of ecosystem.
    pub fn notify(&self, notification: &ExtensionNotification) {
        match self {
            Self::Plugin(listener) => listener.on_notification(notification),
            Self::Mod(listener) => listener.on_notification(notification),
        }
    }
}

impl fmt::Debug for ExtensionListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtensionListener({})", self.ecosystem())
    }
}

/// Why an extension was automatically unregistered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnregisterReason {
    /// The fault count crossed the configured threshold (circuit breaker).
    FaultThreshold { faults: u32, threshold: u32 },
}

impl fmt::Display for UnregisterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FaultThreshold { faults, threshold } => {
                write!(f, "{faults} faults (threshold {threshold})")
            }
        }
    }
}

/// Notification delivered to an extension's own listener.
#[derive(Debug, Clone)]
pub enum ExtensionNotification {
    /// A mutation this extension proposed was not applied.
    MutationRejected {
        subject: SubjectRef,
        proposed: SubjectValue,
        reason: RejectReason,
    },
    /// The extension has been unregistered by the bridge.
    Unregistered { reason: UnregisterReason },
}

/// Operational event published on the bridge's event channel.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// An extension crossed the fault threshold and was unregistered.
    ExtensionUnregistered {
        identity: ExtensionIdentity,
        ecosystem: Ecosystem,
        reason: UnregisterReason,
    },
    /// An external collaborator failed; the bridge degraded instead of
    /// failing the tick.
    CollaboratorUnavailable {
        collaborator: &'static str,
        detail: String,
    },
    /// A tick reached the applied state.
    TickCompleted {
        tick: u64,
        events: usize,
        applied: usize,
        rejected: usize,
    },
}
