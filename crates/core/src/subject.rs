//! Subject references and authoritative world values.
//!
//! A subject reference names one addressable piece of world state (a block
//! coordinate, an entity, a player). Everything the bridge routes is keyed by
//! a `SubjectRef`: events, mutation proposals, cache invalidations and
//! persistence requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A block coordinate in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    /// Create a new block position.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Offset this position by the given deltas.
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The six axis-aligned neighbours of this position.
    pub fn neighbours(self) -> [Self; 6] {
        [
            self.offset(1, 0, 0),
            self.offset(-1, 0, 0),
            self.offset(0, 1, 0),
            self.offset(0, -1, 0),
            self.offset(0, 0, 1),
            self.offset(0, 0, -1),
        ]
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Identifier for a non-player entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Identifier for a player, stable across sessions and servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Generate a fresh random player id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to one addressable piece of world state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectRef {
    Block(BlockPos),
    Entity(EntityId),
    Player(PlayerId),
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(pos) => write!(f, "block{pos}"),
            Self::Entity(id) => write!(f, "entity/{id}"),
            Self::Player(id) => write!(f, "player/{id}"),
        }
    }
}

/// A named block state, e.g. `stone` or `air`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockState(String);

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The empty block state.
    pub fn air() -> Self {
        Self::new("air")
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_air(&self) -> bool {
        self.0 == "air"
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authoritative state of a non-player entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub kind: String,
    pub position: BlockPos,
}

/// Authoritative session state of a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub username: String,
    pub online: bool,
}

/// The value stored per subject in the world state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubjectValue {
    Block(BlockState),
    Entity(EntityState),
    Player(PlayerState),
}

impl SubjectValue {
    /// Short human-readable rendering for logs and notifications.
    pub fn describe(&self) -> String {
        match self {
            Self::Block(state) => state.name().to_string(),
            Self::Entity(state) => format!("{}@{}", state.kind, state.position),
            Self::Player(state) => format!(
                "{} ({})",
                state.username,
                if state.online { "online" } else { "offline" }
            ),
        }
    }
}

/// Pattern over subject references, used to grant mutation scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectPattern {
    /// Every subject.
    Any,
    /// Every block subject.
    AnyBlock,
    /// Blocks inside the inclusive axis-aligned region.
    BlockRegion { min: BlockPos, max: BlockPos },
    /// Every entity subject.
    AnyEntity,
    /// One specific entity.
    Entity(EntityId),
    /// Every player subject.
    AnyPlayer,
    /// One specific player.
    Player(PlayerId),
}

impl SubjectPattern {
    /// Whether the pattern covers the given subject.
    pub fn matches(&self, subject: &SubjectRef) -> bool {
        match (self, subject) {
            (Self::Any, _) => true,
            (Self::AnyBlock, SubjectRef::Block(_)) => true,
            (Self::BlockRegion { min, max }, SubjectRef::Block(pos)) => {
                (min.x..=max.x).contains(&pos.x)
                    && (min.y..=max.y).contains(&pos.y)
                    && (min.z..=max.z).contains(&pos.z)
            }
            (Self::AnyEntity, SubjectRef::Entity(_)) => true,
            (Self::Entity(id), SubjectRef::Entity(other)) => id == other,
            (Self::AnyPlayer, SubjectRef::Player(_)) => true,
            (Self::Player(id), SubjectRef::Player(other)) => id == other,
            _ => false,
        }
    }
}

/// The set of subject patterns an extension is allowed to mutate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    patterns: Vec<SubjectPattern>,
}

impl CapabilitySet {
    pub fn new(patterns: Vec<SubjectPattern>) -> Self {
        Self { patterns }
    }

    /// A capability set covering every subject.
    pub fn allow_all() -> Self {
        Self::new(vec![SubjectPattern::Any])
    }

    /// An empty capability set; every mutation proposal will be rejected.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Whether any granted pattern covers the subject.
    pub fn permits(&self, subject: &SubjectRef) -> bool {
        self.patterns.iter().any(|p| p.matches(subject))
    }

    pub fn patterns(&self) -> &[SubjectPattern] {
        &self.patterns
    }
}
