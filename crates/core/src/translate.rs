//! Event translation: one canonical event in, zero-or-one view per ecosystem
//! out.
//!
//! Translation is a pure function of the event. It touches no mutable state,
//! so it is safe to run concurrently from any number of dispatch workers, and
//! translating the same event twice always yields identical views.
//!
//! Category support differs per ecosystem. The plugin surface has no general
//! entity-movement event; the mod surface has no player-action event. A
//! category unknown to an ecosystem yields no view for it, which is normal,
//! not an error. Categories unknown to the bridge itself become an opaque
//! occurrence view for both ecosystems so future engine events are never
//! silently lost.

use crate::event::{CanonicalEvent, EventCategory, EventPayload, PlayerAction};
use crate::subject::{BlockPos, BlockState, EntityId, PlayerId, SubjectRef};

/// Bukkit-flavoured event view delivered to PluginAPI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginView {
    BlockChange {
        position: BlockPos,
        from: BlockState,
        to: BlockState,
    },
    CreatureSpawn {
        entity: EntityId,
        kind: String,
        position: BlockPos,
    },
    PlayerInteract {
        player: PlayerId,
        action: PlayerAction,
        target: Option<SubjectRef>,
    },
    ServerTick {
        tick: u64,
    },
    /// Catch-all for categories the plugin surface has no native shape for.
    Opaque {
        name: String,
        subject: SubjectRef,
        data: serde_json::Value,
    },
}

/// Forge-flavoured event view delivered to ModAPI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ModView {
    BlockUpdate {
        position: BlockPos,
        old_state: BlockState,
        new_state: BlockState,
    },
    EntityJoinWorld {
        entity: EntityId,
        kind: String,
        position: BlockPos,
    },
    EntityTravel {
        entity: EntityId,
        from: BlockPos,
        to: BlockPos,
    },
    WorldTick {
        tick: u64,
    },
    /// Catch-all for categories the mod surface has no native shape for.
    Opaque {
        name: String,
        subject: SubjectRef,
        data: serde_json::Value,
    },
}

/// Both ecosystem views of one canonical event.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedEvent {
    pub seq: u64,
    pub category: EventCategory,
    pub subject: SubjectRef,
    pub plugin: Option<PluginView>,
    pub mod_api: Option<ModView>,
}

/// Translate a canonical event into its per-ecosystem views.
pub fn translate(event: &CanonicalEvent) -> TranslatedEvent {
    let (plugin, mod_api) = match (&event.payload, event.subject) {
        (EventPayload::BlockChange { from, to }, SubjectRef::Block(position)) => (
            Some(PluginView::BlockChange {
                position,
                from: from.clone(),
                to: to.clone(),
            }),
            Some(ModView::BlockUpdate {
                position,
                old_state: from.clone(),
                new_state: to.clone(),
            }),
        ),
        (EventPayload::EntitySpawn { kind, position }, SubjectRef::Entity(entity)) => (
            Some(PluginView::CreatureSpawn {
                entity,
                kind: kind.clone(),
                position: *position,
            }),
            Some(ModView::EntityJoinWorld {
                entity,
                kind: kind.clone(),
                position: *position,
            }),
        ),
        // The plugin surface has no generic entity-movement event.
        (EventPayload::EntityMove { from, to }, SubjectRef::Entity(entity)) => (
            None,
            Some(ModView::EntityTravel {
                entity,
                from: *from,
                to: *to,
            }),
        ),
        // The mod surface has no player-action event.
        (EventPayload::PlayerAction { action, target }, SubjectRef::Player(player)) => (
            Some(PluginView::PlayerInteract {
                player,
                action: action.clone(),
                target: *target,
            }),
            None,
        ),
        (EventPayload::TickBoundary { tick }, _) => (
            Some(PluginView::ServerTick { tick: *tick }),
            Some(ModView::WorldTick { tick: *tick }),
        ),
        (EventPayload::Custom { name, data }, subject) => (
            Some(PluginView::Opaque {
                name: name.clone(),
                subject,
                data: data.clone(),
            }),
            Some(ModView::Opaque {
                name: name.clone(),
                subject,
                data: data.clone(),
            }),
        ),
        // A payload paired with an unexpected subject kind carries no native
        // shape for either ecosystem; surface it opaquely instead of dropping
        // the notification.
        (payload, subject) => {
            let data = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
            (
                Some(PluginView::Opaque {
                    name: event.category.to_string(),
                    subject,
                    data: data.clone(),
                }),
                Some(ModView::Opaque {
                    name: event.category.to_string(),
                    subject,
                    data,
                }),
            )
        }
    };

    TranslatedEvent {
        seq: event.seq,
        category: event.category,
        subject: event.subject,
        plugin,
        mod_api,
    }
}
