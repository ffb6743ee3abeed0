//! The bridge itself: owns every core component and drives the tick loop.
//!
//! One coordinating task moves each tick through Collecting -> Reconciling ->
//! Applied; a new tick never starts before the previous one is applied.
//! Shutdown is observed only at phase boundaries: an in-flight phase runs to
//! completion and the tick's collected proposals are then discarded rather
//! than partially applied.

use crate::collab::{
    CacheInvalidator, MemoryStore, NoopInvalidator, NoopPublisher, PersistenceStore, StateDelta,
    StatePublisher,
};
use crate::config::BridgeConfig;
use crate::dispatch::{DispatchScheduler, DispatchStatsSnapshot};
use crate::error::BridgeError;
use crate::event::{EventPayload, PlayerAction};
use crate::listener::{BridgeEvent, ExtensionNotification};
use crate::profile::ProfileManager;
use crate::proposal::MutationProposal;
use crate::registry::CapabilityRegistry;
use crate::resolve::{ConflictResolver, RejectReason};
use crate::state::{Occurrence, StateStore, WorldState};
use crate::subject::SubjectRef;
use crate::tick::TickContext;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    pub tick: u64,
    pub events: usize,
    pub proposals: usize,
    pub applied: usize,
    pub rejected: usize,
    /// The tick ran its in-flight phases to completion but its proposals were
    /// discarded because shutdown was requested.
    pub discarded: bool,
}

/// The compatibility bridge: one authoritative world, two extension
/// ecosystems.
pub struct Bridge {
    config: BridgeConfig,
    store: StateStore,
    registry: Arc<CapabilityRegistry>,
    scheduler: DispatchScheduler,
    resolver: ConflictResolver,
    publisher: Arc<dyn StatePublisher>,
    invalidator: Arc<dyn CacheInvalidator>,
    profiles: ProfileManager,
    ops_tx: mpsc::UnboundedSender<BridgeEvent>,
    ops_rx: Option<mpsc::UnboundedReceiver<BridgeEvent>>,
    next_tick: u64,
}

impl Bridge {
    /// Build a bridge with in-memory defaults for every collaborator.
    pub fn new(config: BridgeConfig) -> Self {
        let registry = Arc::new(CapabilityRegistry::new());
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let scheduler = DispatchScheduler::new(registry.clone(), &config, ops_tx.clone());
        let resolver = ConflictResolver::new(config.precedence);
        let persistence: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
        let profiles = ProfileManager::new(persistence, config.persistence_timeout());

        Self {
            store: StateStore::new(),
            registry,
            scheduler,
            resolver,
            publisher: Arc::new(NoopPublisher),
            invalidator: Arc::new(NoopInvalidator),
            profiles,
            ops_tx,
            ops_rx: Some(ops_rx),
            next_tick: 0,
            config,
        }
    }

    /// Replace the proxy-facing state publisher.
    pub fn with_publisher(mut self, publisher: Arc<dyn StatePublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Replace the cache invalidation collaborator.
    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = invalidator;
        self
    }

    /// Replace the persistence collaborator backing player profiles.
    pub fn with_persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.profiles = ProfileManager::new(store, self.config.persistence_timeout());
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The capability registry; the extension loading collaborator registers
    /// and unregisters through this.
    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        self.registry.clone()
    }

    /// Read-only view of the authoritative world.
    pub fn world(&self) -> &WorldState {
        self.store.world()
    }

    pub fn profiles(&self) -> &ProfileManager {
        &self.profiles
    }

    pub fn dispatch_stats(&self) -> DispatchStatsSnapshot {
        self.scheduler.stats()
    }

    /// Queue a raw engine occurrence for the next tick.
    pub fn submit(&self, occurrence: Occurrence) {
        self.store.submit(occurrence);
    }

    /// Take the operational event receiver. Yields `None` after the first
    /// call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<BridgeEvent>> {
        self.ops_rx.take()
    }

    /// Drive the tick loop until cancelled. Cancellation is honoured only at
    /// tick boundaries.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), BridgeError> {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            ticks_per_second = self.config.ticks_per_second,
            workers = self.config.effective_workers(),
            "bridge running"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let summary = self.tick_once(Some(&cancel)).await?;
            if summary.discarded {
                break;
            }
        }

        info!(next_tick = self.next_tick, "bridge stopped at tick boundary");
        Ok(())
    }

    /// Run exactly one tick to the applied state. Exposed for embedders and
    /// tests that step the simulation manually.
    pub async fn run_tick(&mut self) -> Result<TickSummary, BridgeError> {
        self.tick_once(None).await
    }

    async fn tick_once(
        &mut self,
        cancel: Option<&CancellationToken>,
    ) -> Result<TickSummary, BridgeError> {
        let tick = self.next_tick;
        let mut ctx = TickContext::new(tick);

        // Collecting: derive events, seed engine baselines, dispatch.
        self.store.advance(&mut ctx)?;
        self.sync_profiles(&ctx).await;
        self.scheduler.dispatch(&ctx).await?;

        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Ok(self.discard(ctx));
        }

        // Reconciling.
        ctx.begin_reconcile()?;
        let proposals = ctx.take_proposals()?;
        let proposal_count = proposals.len();
        let resolution = self.resolver.reconcile(proposals);

        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Ok(self.discard(ctx));
        }

        // Applied: the resolver is the single writer of the world state.
        let applied = resolution.accepted.len();
        let changes = self
            .resolver
            .apply(resolution.accepted, self.store.world_mut());
        ctx.mark_applied()?;
        self.next_tick += 1;

        self.notify_rejections(&resolution.rejected);

        let subjects: Vec<SubjectRef> = changes.iter().map(|c| c.subject).collect();
        self.publisher.publish(&StateDelta { tick, changes });
        self.invalidator.invalidate(&subjects);

        let flush = self.profiles.flush().await;
        if flush.held > 0 {
            let degraded = BridgeError::CollaboratorUnavailable {
                collaborator: "persistence",
                detail: format!("{} profile write(s) held in memory", flush.held),
            };
            warn!(tick, error = %degraded, "persistence degraded");
            self.send_ops(BridgeEvent::CollaboratorUnavailable {
                collaborator: "persistence",
                detail: degraded.to_string(),
            });
        }

        let summary = TickSummary {
            tick,
            events: ctx.events().len(),
            proposals: proposal_count,
            applied,
            rejected: resolution.rejected.len(),
            discarded: false,
        };
        self.send_ops(BridgeEvent::TickCompleted {
            tick,
            events: summary.events,
            applied: summary.applied,
            rejected: summary.rejected,
        });
        debug!(
            tick,
            events = summary.events,
            proposals = summary.proposals,
            applied = summary.applied,
            rejected = summary.rejected,
            elapsed_us = ctx.elapsed().as_micros() as u64,
            "tick applied"
        );
        Ok(summary)
    }

    /// Emit a per-tick operational event, but only once the receiver has
    /// been claimed; otherwise the unconsumed queue would grow forever.
    fn send_ops(&self, event: BridgeEvent) {
        if self.ops_rx.is_none() {
            let _ = self.ops_tx.send(event);
        }
    }

    /// Discard an in-flight tick at shutdown: phases already ran to
    /// completion, nothing is applied.
    fn discard(&mut self, ctx: TickContext) -> TickSummary {
        warn!(
            tick = ctx.tick(),
            events = ctx.events().len(),
            "shutdown requested; discarding in-flight tick without applying"
        );
        self.next_tick += 1;
        TickSummary {
            tick: ctx.tick(),
            events: ctx.events().len(),
            discarded: true,
            ..TickSummary::default()
        }
    }

    /// Track player sessions from this tick's join/leave events.
    async fn sync_profiles(&self, ctx: &TickContext) {
        for event in ctx.events() {
            let (SubjectRef::Player(player), EventPayload::PlayerAction { action, .. }) =
                (event.subject, &event.payload)
            else {
                continue;
            };
            match action {
                PlayerAction::Join { username } => {
                    self.profiles.player_joined(player, username).await;
                }
                PlayerAction::Leave => self.profiles.player_left(player),
                _ => {}
            }
        }
    }

    /// Report each rejected proposal back to its origin extension.
    fn notify_rejections(&self, rejected: &[(MutationProposal, RejectReason)]) {
        if rejected.is_empty() {
            return;
        }
        let snapshot = self.registry.snapshot();
        for (proposal, reason) in rejected {
            let Some(handle) = proposal.origin.handle() else {
                // Engine baselines lose silently; an extension overrode them.
                continue;
            };
            let rejected = BridgeError::MutationRejected {
                subject: proposal.subject,
                reason: reason.clone(),
            };
            debug!(extension = handle.name(), error = %rejected, "mutation rejected");
            if let Some(entry) = snapshot.get(handle.name()) {
                entry
                    .listener
                    .notify(&ExtensionNotification::MutationRejected {
                        subject: proposal.subject,
                        proposed: proposal.value.clone(),
                        reason: reason.clone(),
                    });
            }
        }
    }
}
