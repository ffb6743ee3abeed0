//! Canonical events: the single source-of-truth representation of a world
//! occurrence before ecosystem-specific translation.

use crate::subject::{BlockPos, BlockState, SubjectRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a canonical event.
///
/// Extensions subscribe per category; the translation layer decides which
/// categories each ecosystem can represent natively. `Custom` covers
/// categories unknown to the bridge itself, which still flow through as
/// opaque occurrences rather than being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    BlockChange,
    EntitySpawn,
    EntityMove,
    PlayerAction,
    TickBoundary,
    Custom,
}

impl EventCategory {
    /// Every category the bridge knows natively, plus the custom catch-all.
    pub fn all() -> [Self; 6] {
        [
            Self::BlockChange,
            Self::EntitySpawn,
            Self::EntityMove,
            Self::PlayerAction,
            Self::TickBoundary,
            Self::Custom,
        ]
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BlockChange => "block_change",
            Self::EntitySpawn => "entity_spawn",
            Self::EntityMove => "entity_move",
            Self::PlayerAction => "player_action",
            Self::TickBoundary => "tick_boundary",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// A player-initiated action carried by a `PlayerAction` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerAction {
    Join { username: String },
    Leave,
    Chat { message: String },
    Interact { target: BlockPos },
}

/// Category-specific payload of a canonical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    BlockChange {
        from: BlockState,
        to: BlockState,
    },
    EntitySpawn {
        kind: String,
        position: BlockPos,
    },
    EntityMove {
        from: BlockPos,
        to: BlockPos,
    },
    PlayerAction {
        action: PlayerAction,
        target: Option<SubjectRef>,
    },
    TickBoundary {
        tick: u64,
    },
    /// Forward-compatibility escape hatch for categories the bridge does not
    /// model natively.
    Custom {
        name: String,
        data: serde_json::Value,
    },
}

impl EventPayload {
    /// The category this payload belongs to.
    pub fn category(&self) -> EventCategory {
        match self {
            Self::BlockChange { .. } => EventCategory::BlockChange,
            Self::EntitySpawn { .. } => EventCategory::EntitySpawn,
            Self::EntityMove { .. } => EventCategory::EntityMove,
            Self::PlayerAction { .. } => EventCategory::PlayerAction,
            Self::TickBoundary { .. } => EventCategory::TickBoundary,
            Self::Custom { .. } => EventCategory::Custom,
        }
    }
}

/// Immutable record of one world occurrence.
///
/// Created once by the state store while collecting a tick, owned by the
/// dispatch scheduler until delivered, then discarded with its tick context.
/// Sequence numbers are globally monotonic: strictly increasing within a
/// tick and continuing across ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub seq: u64,
    pub category: EventCategory,
    pub subject: SubjectRef,
    pub payload: EventPayload,
}

impl CanonicalEvent {
    /// Build an event; the category is derived from the payload.
    pub fn new(seq: u64, subject: SubjectRef, payload: EventPayload) -> Self {
        Self {
            seq,
            category: payload.category(),
            subject,
            payload,
        }
    }
}
