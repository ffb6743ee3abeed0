//! Mutation proposals and the append-only per-tick proposal collection.
//!
//! Listener callbacks never mutate world state directly; they append
//! proposals here, and the conflict resolver decides at the end of the tick
//! which ones are applied.

use crate::registry::{Ecosystem, ExtensionHandle};
use crate::subject::{SubjectRef, SubjectValue};
use crossbeam::queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Priority assigned to the engine's own baseline mutations; any extension
/// proposal outranks it.
pub const ENGINE_PRIORITY: i32 = i32::MIN;

/// Default priority for extension proposals submitted without an explicit
/// hint.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Who submitted a proposal.
#[derive(Debug, Clone)]
pub enum ProposalOrigin {
    /// The engine itself, seeding the baseline outcome of an occurrence.
    Engine,
    /// A registered extension.
    Extension(Arc<ExtensionHandle>),
}

impl ProposalOrigin {
    /// The originating ecosystem, if any.
    pub fn ecosystem(&self) -> Option<Ecosystem> {
        match self {
            Self::Engine => None,
            Self::Extension(handle) => Some(handle.ecosystem),
        }
    }

    /// Display name used in logs and rejection notifications.
    pub fn name(&self) -> &str {
        match self {
            Self::Engine => "engine",
            Self::Extension(handle) => handle.name(),
        }
    }

    /// The extension handle, for extension-originated proposals.
    pub fn handle(&self) -> Option<&Arc<ExtensionHandle>> {
        match self {
            Self::Engine => None,
            Self::Extension(handle) => Some(handle),
        }
    }
}

impl fmt::Display for ProposalOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A listener-requested world mutation.
///
/// Created during dispatch of one canonical event and consumed exactly once
/// by the conflict resolver within the same tick.
#[derive(Debug, Clone)]
pub struct MutationProposal {
    pub origin: ProposalOrigin,
    pub subject: SubjectRef,
    pub value: SubjectValue,
    pub priority: i32,
    /// Global submission index within the tick; final tie-break in conflict
    /// resolution.
    pub submitted_at: u64,
}

/// Thread-safe append-only collection of one tick's proposals.
///
/// Workers only ever push; the resolver drains the full set once the tick
/// leaves the collecting phase.
#[derive(Debug, Default)]
pub struct ProposalQueue {
    queue: SegQueue<MutationProposal>,
    next_index: AtomicU64,
}

impl ProposalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(
        &self,
        origin: ProposalOrigin,
        subject: SubjectRef,
        value: SubjectValue,
        priority: i32,
    ) {
        let submitted_at = self.next_index.fetch_add(1, Ordering::Relaxed);
        self.queue.push(MutationProposal {
            origin,
            subject,
            value,
            priority,
            submitted_at,
        });
    }

    /// Drain all collected proposals in submission order.
    pub fn drain(&self) -> Vec<MutationProposal> {
        let mut proposals = Vec::with_capacity(self.queue.len());
        while let Some(proposal) = self.queue.pop() {
            proposals.push(proposal);
        }
        proposals.sort_by_key(|p| p.submitted_at);
        proposals
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Handle through which one listener callback submits proposals.
///
/// Cheap to clone; every proposal it submits carries the owning extension as
/// its origin.
#[derive(Debug, Clone)]
pub struct ProposalSink {
    origin: Arc<ExtensionHandle>,
    queue: Arc<ProposalQueue>,
}

impl ProposalSink {
    pub fn new(origin: Arc<ExtensionHandle>, queue: Arc<ProposalQueue>) -> Self {
        Self { origin, queue }
    }

    /// Propose a mutation with the default priority.
    pub fn propose(&self, subject: SubjectRef, value: SubjectValue) {
        self.propose_with_priority(subject, value, DEFAULT_PRIORITY);
    }

    /// Propose a mutation with an explicit priority hint.
    pub fn propose_with_priority(&self, subject: SubjectRef, value: SubjectValue, priority: i32) {
        self.queue.push(
            ProposalOrigin::Extension(self.origin.clone()),
            subject,
            value,
            priority,
        );
    }

    /// The extension this sink submits on behalf of.
    pub fn origin(&self) -> &Arc<ExtensionHandle> {
        &self.origin
    }
}
