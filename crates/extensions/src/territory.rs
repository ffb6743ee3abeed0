//! Territory protection extension for the plugin surface.
//!
//! Players (or other extensions) claim block regions; whenever a block inside
//! a claim changes, the extension proposes reverting it to its previous state
//! at high priority. With the bridge's default plugin-first precedence this
//! makes claims effectively immutable to mod-side machinery.

use janus::{
    BlockPos, CapabilitySet, EventCategory, Extension, ExtensionNotification, PluginListener,
    PluginView, ProposalSink, SubjectPattern, SubjectRef, SubjectValue,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Priority for protection reverts; high enough to beat ordinary proposals.
pub const REVERT_PRIORITY: i32 = 100;

/// One claimed region, inclusive on both corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub owner: String,
    pub min: BlockPos,
    pub max: BlockPos,
}

impl Claim {
    pub fn new(owner: impl Into<String>, min: BlockPos, max: BlockPos) -> Self {
        Self {
            owner: owner.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, position: BlockPos) -> bool {
        (self.min.x..=self.max.x).contains(&position.x)
            && (self.min.y..=self.max.y).contains(&position.y)
            && (self.min.z..=self.max.z).contains(&position.z)
    }
}

/// Plugin-ecosystem extension that keeps claimed regions unchanged.
pub struct TerritoryExtension {
    claims: RwLock<Vec<Claim>>,
    reverts_proposed: AtomicU64,
    reverts_rejected: AtomicU64,
}

impl TerritoryExtension {
    pub fn new() -> Self {
        Self {
            claims: RwLock::new(Vec::new()),
            reverts_proposed: AtomicU64::new(0),
            reverts_rejected: AtomicU64::new(0),
        }
    }

    /// Record a new claim.
    pub fn claim(&self, owner: impl Into<String>, min: BlockPos, max: BlockPos) {
        let claim = Claim::new(owner, min, max);
        tracing::info!(owner = %claim.owner, "territory claimed");
        self.claims
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(claim);
    }

    pub fn claims(&self) -> Vec<Claim> {
        self.claims
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether any claim covers the position.
    pub fn is_protected(&self, position: BlockPos) -> bool {
        self.claims
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|claim| claim.contains(position))
    }

    /// Reverts proposed since startup.
    pub fn reverts_proposed(&self) -> u64 {
        self.reverts_proposed.load(Ordering::Relaxed)
    }

    /// Reverts that lost conflict resolution since startup.
    pub fn reverts_rejected(&self) -> u64 {
        self.reverts_rejected.load(Ordering::Relaxed)
    }

    /// Package this extension for registration with the bridge.
    pub fn into_extension(self: Arc<Self>) -> Extension {
        Extension::plugin("territory", semver::Version::new(1, 0, 0), self)
            .with_subscriptions(vec![EventCategory::BlockChange])
            .with_capabilities(CapabilitySet::new(vec![SubjectPattern::AnyBlock]))
    }
}

impl Default for TerritoryExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginListener for TerritoryExtension {
    fn on_event(&self, view: &PluginView, sink: &ProposalSink) -> anyhow::Result<()> {
        let PluginView::BlockChange { position, from, to } = view else {
            return Ok(());
        };
        if from == to || !self.is_protected(*position) {
            return Ok(());
        }

        tracing::debug!(
            position = %position,
            from = %from,
            to = %to,
            "reverting block change inside claimed territory"
        );
        sink.propose_with_priority(
            SubjectRef::Block(*position),
            SubjectValue::Block(from.clone()),
            REVERT_PRIORITY,
        );
        self.reverts_proposed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_notification(&self, notification: &ExtensionNotification) {
        match notification {
            ExtensionNotification::MutationRejected { subject, reason, .. } => {
                self.reverts_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(subject = %subject, reason = %reason, "territory revert rejected");
            }
            ExtensionNotification::Unregistered { reason } => {
                tracing::warn!(reason = %reason, "territory extension unregistered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus::proposal::ProposalQueue;
    use janus::{
        BlockState, Bridge, BridgeConfig, Ecosystem, ExtensionHandle, ExtensionIdentity,
        Occurrence,
    };

    fn sink() -> (ProposalSink, Arc<ProposalQueue>) {
        let handle = Arc::new(ExtensionHandle {
            identity: ExtensionIdentity::new("territory", semver::Version::new(1, 0, 0)),
            ecosystem: Ecosystem::PluginApi,
            subscriptions: vec![EventCategory::BlockChange],
            capabilities: CapabilitySet::new(vec![SubjectPattern::AnyBlock]),
        });
        let queue = Arc::new(ProposalQueue::new());
        (ProposalSink::new(handle, queue.clone()), queue)
    }

    #[test]
    fn changes_inside_a_claim_are_reverted() {
        let territory = Arc::new(TerritoryExtension::new());
        territory.claim("alex", BlockPos::new(0, 0, 0), BlockPos::new(10, 10, 10));
        let (sink, queue) = sink();

        territory
            .on_event(
                &PluginView::BlockChange {
                    position: BlockPos::new(5, 5, 5),
                    from: BlockState::new("stone"),
                    to: BlockState::air(),
                },
                &sink,
            )
            .unwrap();

        let proposals = queue.drain();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].priority, REVERT_PRIORITY);
        assert_eq!(
            proposals[0].value,
            SubjectValue::Block(BlockState::new("stone"))
        );
        assert_eq!(territory.reverts_proposed(), 1);
    }

    #[test]
    fn changes_outside_claims_are_ignored() {
        let territory = Arc::new(TerritoryExtension::new());
        territory.claim("alex", BlockPos::new(0, 0, 0), BlockPos::new(10, 10, 10));
        let (sink, queue) = sink();

        territory
            .on_event(
                &PluginView::BlockChange {
                    position: BlockPos::new(50, 0, 0),
                    from: BlockState::new("stone"),
                    to: BlockState::air(),
                },
                &sink,
            )
            .unwrap();

        assert!(queue.is_empty());
    }

    #[test]
    fn no_op_changes_are_ignored() {
        let territory = Arc::new(TerritoryExtension::new());
        territory.claim("alex", BlockPos::new(0, 0, 0), BlockPos::new(10, 10, 10));
        let (sink, queue) = sink();

        territory
            .on_event(
                &PluginView::BlockChange {
                    position: BlockPos::new(5, 5, 5),
                    from: BlockState::new("stone"),
                    to: BlockState::new("stone"),
                },
                &sink,
            )
            .unwrap();

        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn protected_blocks_survive_a_tick() {
        let mut bridge = Bridge::new(BridgeConfig::default());
        let territory = Arc::new(TerritoryExtension::new());
        territory.claim("alex", BlockPos::new(0, 0, 0), BlockPos::new(10, 10, 10));

        // Seed the protected block before registering, so the seed itself is
        // not reverted.
        let pos = BlockPos::new(5, 5, 5);
        bridge.submit(Occurrence::BlockSet {
            position: pos,
            block: BlockState::new("stone"),
        });
        bridge.run_tick().await.unwrap();

        bridge
            .registry()
            .register(territory.clone().into_extension())
            .unwrap();

        // Griefing attempt: the engine reports the block becoming air, the
        // extension wins it back.
        bridge.submit(Occurrence::BlockSet {
            position: pos,
            block: BlockState::air(),
        });
        bridge.run_tick().await.unwrap();

        assert_eq!(bridge.world().block_at(pos), BlockState::new("stone"));
        assert_eq!(territory.reverts_proposed(), 1);
    }
}
