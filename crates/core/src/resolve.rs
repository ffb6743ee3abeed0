//! Conflict resolution: deciding, per subject, which of a tick's collected
//! mutation proposals are applied.
//!
//! Proposals on disjoint subjects all apply. Proposals on the same subject
//! are ranked by explicit priority, then by the configured ecosystem
//! precedence, then by submission order. The ranking is a total order, so the
//! final world state does not depend on worker scheduling.

use crate::proposal::{MutationProposal, ProposalOrigin};
use crate::registry::Ecosystem;
use crate::state::WorldState;
use crate::subject::{SubjectRef, SubjectValue};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Which ecosystem wins a same-priority conflict.
///
/// The default is plugin-authoritative: mods historically assume they observe
/// the final state of plugin-driven changes within the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    PluginFirst,
    ModFirst,
}

impl Default for Precedence {
    fn default() -> Self {
        Self::PluginFirst
    }
}

impl Precedence {
    /// Rank of an origin under this precedence; higher wins. The engine's own
    /// baseline always ranks below both ecosystems.
    fn rank(self, origin: &ProposalOrigin) -> u8 {
        match (self, origin.ecosystem()) {
            (_, None) => 0,
            (Self::PluginFirst, Some(Ecosystem::ModApi)) => 1,
            (Self::PluginFirst, Some(Ecosystem::PluginApi)) => 2,
            (Self::ModFirst, Some(Ecosystem::PluginApi)) => 1,
            (Self::ModFirst, Some(Ecosystem::ModApi)) => 2,
        }
    }
}

/// Why a proposal was not applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    /// Another proposal on the same subject won the tie-break.
    #[error("superseded by a proposal from '{winner}'")]
    Superseded { winner: String },

    /// The subject lies outside the origin's granted mutation scope.
    #[error("subject outside the granted mutation scope")]
    OutOfScope,
}

/// Outcome of reconciling one tick's proposals.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Winning proposals, in submission order.
    pub accepted: Vec<MutationProposal>,
    /// Losing proposals with the reason each lost.
    pub rejected: Vec<(MutationProposal, RejectReason)>,
}

/// One subject's applied change, as published to collaborators.
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub subject: SubjectRef,
    pub previous: Option<SubjectValue>,
    pub value: SubjectValue,
    pub origin: ProposalOrigin,
}

/// Resolves concurrent, conflicting mutations proposed for the same subject
/// within one tick.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    precedence: Precedence,
}

impl ConflictResolver {
    pub fn new(precedence: Precedence) -> Self {
        Self { precedence }
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    /// Partition a tick's proposals into accepted and rejected sets.
    ///
    /// Scope enforcement happens first: an extension proposal targeting a
    /// subject outside its granted capability set is rejected regardless of
    /// conflicts. Engine baselines are exempt from scope checks.
    pub fn reconcile(&self, proposals: Vec<MutationProposal>) -> Resolution {
        let mut resolution = Resolution::default();
        let mut by_subject: HashMap<SubjectRef, Vec<MutationProposal>> = HashMap::new();

        for proposal in proposals {
            if let ProposalOrigin::Extension(handle) = &proposal.origin {
                if !handle.capabilities.permits(&proposal.subject) {
                    tracing::debug!(
                        extension = handle.name(),
                        subject = %proposal.subject,
                        "proposal outside granted scope"
                    );
                    resolution.rejected.push((proposal, RejectReason::OutOfScope));
                    continue;
                }
            }
            by_subject.entry(proposal.subject).or_default().push(proposal);
        }

        for (_, mut group) in by_subject {
            group.sort_by(|a, b| self.compare(a, b));
            let mut group = group.into_iter();
            // The group is non-empty by construction.
            if let Some(winner) = group.next() {
                let winner_name = winner.origin.name().to_string();
                for loser in group {
                    resolution.rejected.push((
                        loser,
                        RejectReason::Superseded {
                            winner: winner_name.clone(),
                        },
                    ));
                }
                resolution.accepted.push(winner);
            }
        }

        // Deterministic output ordering regardless of map iteration.
        resolution.accepted.sort_by_key(|p| p.submitted_at);
        resolution.rejected.sort_by_key(|(p, _)| p.submitted_at);
        resolution
    }

    /// Apply accepted proposals to the world. This is the only write path
    /// into `WorldState`; the returned diff feeds the proxy and cache
    /// collaborators.
    pub fn apply(
        &self,
        accepted: Vec<MutationProposal>,
        world: &mut WorldState,
    ) -> Vec<AppliedChange> {
        let mut changes = Vec::with_capacity(accepted.len());
        for proposal in accepted {
            let previous = world.set(proposal.subject, proposal.value.clone());
            changes.push(AppliedChange {
                subject: proposal.subject,
                previous,
                value: proposal.value,
                origin: proposal.origin,
            });
        }
        changes
    }

    /// Total order over conflicting proposals; the first after sorting wins.
    fn compare(&self, a: &MutationProposal, b: &MutationProposal) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| {
                self.precedence
                    .rank(&b.origin)
                    .cmp(&self.precedence.rank(&a.origin))
            })
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(Precedence::default())
    }
}
