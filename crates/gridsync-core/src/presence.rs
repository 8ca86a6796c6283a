//! Per-connection presence: identity, display name, cursor and color.
//!
//! Presence is ephemeral and independent of grid contents. A connection is
//! invisible to others until it has announced a name.

use dashmap::DashMap;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Colors handed out when no palette is configured.
pub const DEFAULT_PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEEAD", "#D4A5A5", "#9B59B6", "#3498DB",
    "#E67E22", "#2ECC71",
];

/// Opaque connection identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cursor position as sent by clients.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PresenceRecord {
    pub name: Option<String>,
    pub position: Option<Position>,
    pub color: String,
    joined: u64,
}

/// One entry of the user list shown to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleUser {
    pub user_id: ConnectionId,
    pub name: String,
    pub position: Option<Position>,
    pub color: String,
}

/// Pick a color from `palette`, falling back to [`DEFAULT_PALETTE`].
pub fn random_color(palette: &[String]) -> String {
    let mut rng = rand::thread_rng();
    match palette.choose(&mut rng) {
        Some(color) => color.clone(),
        None => DEFAULT_PALETTE
            .choose(&mut rng)
            .copied()
            .unwrap_or("#000000")
            .to_string(),
    }
}

#[derive(Default)]
pub struct PresenceTracker {
    entries: DashMap<ConnectionId, PresenceRecord>,
    next_join: AtomicU64,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, color: impl Into<String>) {
        let joined = self.next_join.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            id,
            PresenceRecord {
                name: None,
                position: None,
                color: color.into(),
                joined,
            },
        );
    }

    /// Returns false if the connection is not registered.
    pub fn set_name(&self, id: ConnectionId, name: impl Into<String>) -> bool {
        match self.entries.get_mut(&id) {
            Some(mut entry) => {
                entry.name = Some(name.into());
                true
            }
            None => false,
        }
    }

    pub fn set_position(&self, id: ConnectionId, position: Option<Position>) -> bool {
        match self.entries.get_mut(&id) {
            Some(mut entry) => {
                entry.position = position;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: ConnectionId) -> Option<PresenceRecord> {
        self.entries.remove(&id).map(|(_, record)| record)
    }

    pub fn get(&self, id: ConnectionId) -> Option<PresenceRecord> {
        self.entries.get(&id).map(|entry| entry.clone())
    }

    pub fn has_name(&self, id: ConnectionId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.name.is_some())
    }

    /// Named connections in registration order.
    pub fn list_visible(&self) -> Vec<VisibleUser> {
        let mut named: Vec<(u64, VisibleUser)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                let name = record.name.clone()?;
                Some((
                    record.joined,
                    VisibleUser {
                        user_id: *entry.key(),
                        name,
                        position: record.position,
                        color: record.color.clone(),
                    },
                ))
            })
            .collect();
        named.sort_by_key(|(joined, _)| *joined);
        named.into_iter().map(|(_, user)| user).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
