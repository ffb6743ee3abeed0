//! Durable player profiles, written through the persistence collaborator.
//!
//! Profiles are cached in memory for the lifetime of a session. Writes go to
//! the persistence store with an explicit timeout; when the store does not
//! answer, the dirty profile is held in memory and retried on a later tick.
//! Persistence failures degrade, they never fail a tick.

use crate::collab::PersistenceStore;
use crate::subject::{PlayerId, SubjectRef};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A player's persistent record, shared across servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub player: PlayerId,
    pub username: String,
    pub first_join: DateTime<Utc>,
    pub last_join: DateTime<Utc>,
    pub playtime_secs: u64,
    pub rank: String,
    /// Permission nodes; wildcard nodes (`foo.*`, root `*`) cover subtrees.
    pub permissions: HashMap<String, bool>,
    pub statistics: HashMap<String, i64>,
    /// Free-form data owned by extensions.
    pub custom: HashMap<String, serde_json::Value>,
}

impl PlayerProfile {
    /// Create a fresh profile with default rank and empty grants.
    pub fn new(player: PlayerId, username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            player,
            username: username.into(),
            first_join: now,
            last_join: now,
            playtime_secs: 0,
            rank: "player".into(),
            permissions: HashMap::new(),
            statistics: HashMap::new(),
            custom: HashMap::new(),
        }
    }

    /// Resolve a permission node, walking wildcard nodes from the most
    /// specific prefix outward.
    pub fn has_permission(&self, node: &str) -> bool {
        if let Some(value) = self.permissions.get(node) {
            return *value;
        }

        let mut prefix = String::new();
        for part in node.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            if let Some(value) = self.permissions.get(&format!("{prefix}.*")) {
                return *value;
            }
        }

        self.permissions.get("*").copied().unwrap_or(false)
    }

    pub fn set_permission(&mut self, node: impl Into<String>, value: bool) {
        self.permissions.insert(node.into(), value);
    }

    pub fn statistic(&self, name: &str) -> i64 {
        self.statistics.get(name).copied().unwrap_or(0)
    }

    pub fn increment_statistic(&mut self, name: impl Into<String>, by: i64) {
        *self.statistics.entry(name.into()).or_insert(0) += by;
    }

    pub fn add_playtime(&mut self, secs: u64) {
        self.playtime_secs += secs;
    }

    /// Mark a new session start.
    pub fn touch_join(&mut self) {
        self.last_join = Utc::now();
    }
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Profiles successfully written this pass.
    pub written: usize,
    /// Profiles still dirty because the store did not accept them.
    pub held: usize,
}

/// In-memory profile cache with write-through persistence.
pub struct ProfileManager {
    store: Arc<dyn PersistenceStore>,
    timeout: Duration,
    cached: DashMap<PlayerId, PlayerProfile>,
    dirty: DashMap<PlayerId, ()>,
}

impl ProfileManager {
    pub fn new(store: Arc<dyn PersistenceStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            cached: DashMap::new(),
            dirty: DashMap::new(),
        }
    }

    /// Load (or create) a profile on player join.
    ///
    /// A store failure degrades to a fresh in-memory profile marked dirty, so
    /// the join itself never fails.
    pub async fn player_joined(&self, player: PlayerId, username: &str) -> PlayerProfile {
        let subject = SubjectRef::Player(player);
        let loaded = match tokio::time::timeout(self.timeout, self.store.load(&subject)).await {
            Ok(Ok(Some(value))) => match serde_json::from_value::<PlayerProfile>(value) {
                Ok(profile) => Some(profile),
                Err(err) => {
                    tracing::warn!(player = %player, error = %err, "stored profile is malformed; recreating");
                    None
                }
            },
            Ok(Ok(None)) => None,
            Ok(Err(err)) => {
                tracing::warn!(player = %player, error = %err, "profile load failed; starting from memory");
                None
            }
            Err(_) => {
                tracing::warn!(player = %player, "profile load timed out; starting from memory");
                None
            }
        };

        let mut profile = loaded.unwrap_or_else(|| PlayerProfile::new(player, username));
        profile.username = username.to_string();
        profile.touch_join();

        self.cached.insert(player, profile.clone());
        self.dirty.insert(player, ());
        profile
    }

    /// Record a session end and queue the profile for persistence.
    pub fn player_left(&self, player: PlayerId) {
        if let Some(mut profile) = self.cached.get_mut(&player) {
            let session_secs = (Utc::now() - profile.last_join).num_seconds().max(0) as u64;
            profile.add_playtime(session_secs);
            self.dirty.insert(player, ());
        }
    }

    pub fn get(&self, player: PlayerId) -> Option<PlayerProfile> {
        self.cached.get(&player).map(|p| p.clone())
    }

    /// Mutate a cached profile in place and mark it dirty.
    pub fn update<F>(&self, player: PlayerId, mutate: F) -> bool
    where
        F: FnOnce(&mut PlayerProfile),
    {
        match self.cached.get_mut(&player) {
            Some(mut profile) => {
                mutate(&mut profile);
                self.dirty.insert(player, ());
                true
            }
            None => false,
        }
    }

    /// Number of profiles waiting to be written.
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Write every dirty profile through the store. Failed writes stay dirty
    /// for the next pass.
    pub async fn flush(&self) -> FlushOutcome {
        let pending: Vec<PlayerId> = self.dirty.iter().map(|e| *e.key()).collect();
        let mut outcome = FlushOutcome::default();

        for player in pending {
            let Some(profile) = self.get(player) else {
                self.dirty.remove(&player);
                continue;
            };
            let value = match serde_json::to_value(&profile) {
                Ok(value) => value,
                Err(err) => {
                    tracing::error!(player = %player, error = %err, "profile serialization failed");
                    self.dirty.remove(&player);
                    continue;
                }
            };

            let subject = SubjectRef::Player(player);
            match tokio::time::timeout(self.timeout, self.store.store(&subject, value)).await {
                Ok(Ok(())) => {
                    self.dirty.remove(&player);
                    outcome.written += 1;
                }
                Ok(Err(err)) => {
                    tracing::warn!(player = %player, error = %err, "profile write failed; holding in memory");
                    outcome.held += 1;
                }
                Err(_) => {
                    tracing::warn!(player = %player, "profile write timed out; holding in memory");
                    outcome.held += 1;
                }
            }
        }
        outcome
    }
}
