//! The authoritative world state and the store that advances it tick by
//! tick.
//!
//! `WorldState` has exactly one writer (the conflict resolver's apply step)
//! and any number of readers. The `StateStore` turns externally submitted raw
//! occurrences into canonical events during `advance`; the advance call
//! itself is read-derive-emit and never mutates the world directly.

use crate::error::BridgeError;
use crate::event::{CanonicalEvent, EventPayload, PlayerAction};
use crate::proposal::{ProposalOrigin, ENGINE_PRIORITY};
use crate::subject::{
    BlockPos, BlockState, EntityId, EntityState, PlayerId, PlayerState, SubjectRef, SubjectValue,
};
use crate::tick::TickContext;
use crossbeam::queue::SegQueue;
use std::collections::HashMap;

/// A raw engine occurrence, submitted from outside the tick loop and turned
/// into a canonical event at the next `advance`.
#[derive(Debug, Clone)]
pub enum Occurrence {
    BlockSet {
        position: BlockPos,
        block: BlockState,
    },
    EntitySpawned {
        entity: EntityId,
        kind: String,
        position: BlockPos,
    },
    EntityMoved {
        entity: EntityId,
        to: BlockPos,
    },
    PlayerActed {
        player: PlayerId,
        action: PlayerAction,
        target: Option<SubjectRef>,
    },
    /// Escape hatch for occurrence kinds the bridge does not model natively.
    Custom {
        subject: SubjectRef,
        name: String,
        data: serde_json::Value,
    },
}

/// The authoritative subject -> value mapping.
#[derive(Debug, Default)]
pub struct WorldState {
    entries: HashMap<SubjectRef, SubjectValue>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject: &SubjectRef) -> Option<&SubjectValue> {
        self.entries.get(subject)
    }

    /// The block state at a position; unset positions are air.
    pub fn block_at(&self, position: BlockPos) -> BlockState {
        match self.entries.get(&SubjectRef::Block(position)) {
            Some(SubjectValue::Block(state)) => state.clone(),
            _ => BlockState::air(),
        }
    }

    /// The recorded state of an entity, if it exists.
    pub fn entity(&self, entity: EntityId) -> Option<&EntityState> {
        match self.entries.get(&SubjectRef::Entity(entity)) {
            Some(SubjectValue::Entity(state)) => Some(state),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subjects(&self) -> impl Iterator<Item = &SubjectRef> {
        self.entries.keys()
    }

    /// Write a subject's value, returning the previous one. Crate-private:
    /// the conflict resolver is the only caller.
    pub(crate) fn set(&mut self, subject: SubjectRef, value: SubjectValue) -> Option<SubjectValue> {
        self.entries.insert(subject, value)
    }
}

/// The entity/world state store: owns the world, queues raw occurrences, and
/// advances one tick at a time.
pub struct StateStore {
    world: WorldState,
    inbox: SegQueue<Occurrence>,
    next_seq: u64,
    last_tick: Option<u64>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_world(WorldState::new())
    }

    pub fn with_world(world: WorldState) -> Self {
        Self {
            world,
            inbox: SegQueue::new(),
            next_seq: 0,
            last_tick: None,
        }
    }

    /// Queue a raw occurrence for the next tick. Thread-safe; callable from
    /// any collaborator at any time.
    pub fn submit(&self, occurrence: Occurrence) {
        self.inbox.push(occurrence);
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub(crate) fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    /// Number of occurrences waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Advance by one tick: drain queued occurrences into canonical events on
    /// the context, seed the engine's baseline proposals, and close the tick
    /// with a boundary event.
    ///
    /// Called exactly once per tick. Calling it out of tick order is a fatal
    /// contract violation: the sequence invariant cannot be trusted past
    /// that point.
    pub fn advance(&mut self, ctx: &mut TickContext) -> Result<(), BridgeError> {
        let expected = self.last_tick.map_or(0, |t| t + 1);
        if ctx.tick() != expected {
            return Err(BridgeError::ContractViolation(format!(
                "advance called for tick {} but tick {} was expected",
                ctx.tick(),
                expected
            )));
        }

        let queue = ctx.proposal_queue();
        let mut drained = 0usize;
        while let Some(occurrence) = self.inbox.pop() {
            drained += 1;
            let (subject, payload, baseline) = self.derive(occurrence);
            let event = CanonicalEvent::new(self.bump_seq(), subject, payload);
            ctx.push_event(event)?;
            if let Some(value) = baseline {
                queue.push(ProposalOrigin::Engine, subject, value, ENGINE_PRIORITY);
            }
        }

        let boundary = CanonicalEvent::new(
            self.bump_seq(),
            SubjectRef::Block(BlockPos::new(0, 0, 0)),
            EventPayload::TickBoundary { tick: ctx.tick() },
        );
        ctx.push_event(boundary)?;

        self.last_tick = Some(ctx.tick());
        tracing::debug!(
            tick = ctx.tick(),
            occurrences = drained,
            events = ctx.events().len(),
            "state store advanced"
        );
        Ok(())
    }

    /// Derive the canonical payload and the engine's baseline proposal value
    /// for one occurrence, reading (never writing) the current world.
    fn derive(
        &self,
        occurrence: Occurrence,
    ) -> (SubjectRef, EventPayload, Option<SubjectValue>) {
        match occurrence {
            Occurrence::BlockSet { position, block } => {
                let from = self.world.block_at(position);
                (
                    SubjectRef::Block(position),
                    EventPayload::BlockChange {
                        from,
                        to: block.clone(),
                    },
                    Some(SubjectValue::Block(block)),
                )
            }
            Occurrence::EntitySpawned {
                entity,
                kind,
                position,
            } => (
                SubjectRef::Entity(entity),
                EventPayload::EntitySpawn {
                    kind: kind.clone(),
                    position,
                },
                Some(SubjectValue::Entity(EntityState { kind, position })),
            ),
            Occurrence::EntityMoved { entity, to } => {
                let current = self.world.entity(entity);
                let from = current.map_or(to, |state| state.position);
                let kind = current.map_or_else(|| "unknown".to_string(), |s| s.kind.clone());
                (
                    SubjectRef::Entity(entity),
                    EventPayload::EntityMove { from, to },
                    Some(SubjectValue::Entity(EntityState { kind, position: to })),
                )
            }
            Occurrence::PlayerActed {
                player,
                action,
                target,
            } => {
                let baseline = match &action {
                    PlayerAction::Join { username } => Some(SubjectValue::Player(PlayerState {
                        username: username.clone(),
                        online: true,
                    })),
                    PlayerAction::Leave => {
                        self.world
                            .get(&SubjectRef::Player(player))
                            .and_then(|value| match value {
                                SubjectValue::Player(state) => Some(SubjectValue::Player(
                                    PlayerState {
                                        username: state.username.clone(),
                                        online: false,
                                    },
                                )),
                                _ => None,
                            })
                    }
                    // Chat and interaction change no authoritative state.
                    PlayerAction::Chat { .. } | PlayerAction::Interact { .. } => None,
                };
                (
                    SubjectRef::Player(player),
                    EventPayload::PlayerAction { action, target },
                    baseline,
                )
            }
            Occurrence::Custom {
                subject,
                name,
                data,
            } => (subject, EventPayload::Custom { name, data }, None),
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
