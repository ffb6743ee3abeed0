//! Interfaces to the bridge's external collaborators: the proxy layer, the
//! durable store and the cache layer.
//!
//! The bridge only ever publishes or issues request/response calls here; the
//! collaborators' own delivery semantics (load balancing, at-least-once
//! invalidation consumption) are not the bridge's concern.

use crate::resolve::AppliedChange;
use crate::subject::SubjectRef;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// Batch of applied changes for one tick, as published to the proxy.
#[derive(Debug, Clone)]
pub struct StateDelta {
    pub tick: u64,
    pub changes: Vec<AppliedChange>,
}

/// Publisher of player-facing state-change notifications.
///
/// Fire-and-forget: the bridge is the publisher, the proxy a subscriber, and
/// no reply is expected.
pub trait StatePublisher: Send + Sync {
    fn publish(&self, delta: &StateDelta);
}

/// Post-apply cache invalidation, keyed by subject reference.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, subjects: &[SubjectRef]);
}

/// Request/response store for durable subject data.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load(&self, subject: &SubjectRef) -> anyhow::Result<Option<serde_json::Value>>;
    async fn store(&self, subject: &SubjectRef, value: serde_json::Value) -> anyhow::Result<()>;
}

/// `StatePublisher` over a tokio broadcast channel.
///
/// Publishing never blocks and never fails: with no subscribers (or lagged
/// ones) deltas are simply dropped, which is the eventually-consistent
/// contract the proxy signed up for.
pub struct ChannelPublisher {
    tx: broadcast::Sender<StateDelta>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateDelta> {
        self.tx.subscribe()
    }
}

impl StatePublisher for ChannelPublisher {
    fn publish(&self, delta: &StateDelta) {
        if !delta.changes.is_empty() {
            let _ = self.tx.send(delta.clone());
        }
    }
}

/// `CacheInvalidator` over a tokio broadcast channel, one message per
/// subject.
pub struct ChannelInvalidator {
    tx: broadcast::Sender<SubjectRef>,
}

impl ChannelInvalidator {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubjectRef> {
        self.tx.subscribe()
    }
}

impl CacheInvalidator for ChannelInvalidator {
    fn invalidate(&self, subjects: &[SubjectRef]) {
        for subject in subjects {
            let _ = self.tx.send(*subject);
        }
    }
}

/// Publisher that drops everything; useful for tests and headless setups.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl StatePublisher for NoopPublisher {
    fn publish(&self, _delta: &StateDelta) {}
}

/// Invalidator that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _subjects: &[SubjectRef]) {}
}

/// In-memory persistence store for tests and single-node use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<SubjectRef, serde_json::Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn load(&self, subject: &SubjectRef) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.entries.get(subject).map(|v| v.clone()))
    }

    async fn store(&self, subject: &SubjectRef, value: serde_json::Value) -> anyhow::Result<()> {
        self.entries.insert(*subject, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::ProposalOrigin;
    use crate::subject::{BlockPos, BlockState, SubjectValue};

    fn delta(tick: u64) -> StateDelta {
        StateDelta {
            tick,
            changes: vec![AppliedChange {
                subject: SubjectRef::Block(BlockPos::new(0, 0, 0)),
                previous: None,
                value: SubjectValue::Block(BlockState::new("stone")),
                origin: ProposalOrigin::Engine,
            }],
        }
    }

    #[tokio::test]
    async fn publisher_delivers_to_subscribers() {
        let publisher = ChannelPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.publish(&delta(3));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.tick, 3);
    }

    #[tokio::test]
    async fn publisher_without_subscribers_does_not_fail() {
        let publisher = ChannelPublisher::new(8);
        publisher.publish(&delta(1));
    }

    #[tokio::test]
    async fn empty_deltas_are_not_published() {
        let publisher = ChannelPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.publish(&StateDelta {
            tick: 1,
            changes: Vec::new(),
        });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalidator_sends_one_message_per_subject() {
        let invalidator = ChannelInvalidator::new(8);
        let mut rx = invalidator.subscribe();

        let subjects = [
            SubjectRef::Block(BlockPos::new(0, 0, 0)),
            SubjectRef::Block(BlockPos::new(1, 0, 0)),
        ];
        invalidator.invalidate(&subjects);

        assert_eq!(rx.recv().await.unwrap(), subjects[0]);
        assert_eq!(rx.recv().await.unwrap(), subjects[1]);
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryStore::new();
        let subject = SubjectRef::Block(BlockPos::new(0, 0, 0));

        assert!(store.load(&subject).await.unwrap().is_none());
        store
            .store(&subject, serde_json::json!({ "block": "stone" }))
            .await
            .unwrap();
        assert_eq!(
            store.load(&subject).await.unwrap(),
            Some(serde_json::json!({ "block": "stone" }))
        );
    }
}
