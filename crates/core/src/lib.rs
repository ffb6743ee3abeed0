//! Janus: a compatibility bridge hosting two mutually incompatible extension
//! ecosystems (a Bukkit-style plugin API and a Forge-style mod API) against
//! a single authoritative world state.
//!
//! Each tick, the state store turns queued engine occurrences into canonical
//! events; the translation layer produces each ecosystem's view of every
//! event; the dispatch scheduler delivers those views to registered listeners
//! in a deterministic order and collects the mutations they propose; and the
//! conflict resolver reconciles the proposals and applies the winners back to
//! the world before the next tick begins.

pub mod bridge;
pub mod collab;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod listener;
pub mod profile;
pub mod proposal;
pub mod registry;
pub mod resolve;
pub mod state;
pub mod subject;
pub mod telemetry;
pub mod tick;
pub mod translate;

pub use bridge::{Bridge, TickSummary};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use event::{CanonicalEvent, EventCategory, EventPayload, PlayerAction};
pub use listener::{
    BridgeEvent, ExtensionNotification, ModListener, PluginListener, UnregisterReason,
};
pub use proposal::{MutationProposal, ProposalOrigin, ProposalSink, DEFAULT_PRIORITY};
pub use registry::{
    CapabilityRegistry, Ecosystem, Extension, ExtensionHandle, ExtensionIdentity,
};
pub use resolve::{AppliedChange, ConflictResolver, Precedence, RejectReason};
pub use state::{Occurrence, StateStore, WorldState};
pub use subject::{
    BlockPos, BlockState, CapabilitySet, EntityId, EntityState, PlayerId, PlayerState,
    SubjectPattern, SubjectRef, SubjectValue,
};
pub use tick::{TickContext, TickPhase};
pub use translate::{translate, ModView, PluginView, TranslatedEvent};
