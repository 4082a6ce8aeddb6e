//! Presence channel member tracking.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A member of a presence channel.
///
/// Identity is the `id` alone; `info` is an opaque application payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub info: Value,
}

impl Member {
    pub fn new(id: impl Into<String>, info: Value) -> Self {
        Self {
            id: id.into(),
            info,
        }
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Member {}

/// Thread-safe roster of the members currently present on a channel.
///
/// `members()` hands out a fresh snapshot each call; mutating the roster
/// afterwards never changes a snapshot already taken.
#[derive(Debug, Default)]
pub struct Members {
    members: RwLock<HashMap<String, Member>>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a member. Re-adding an existing id overwrites its info.
    pub fn upsert(&self, member: Member) {
        self.members.write().insert(member.id.clone(), member);
    }

    /// Remove a member by id, returning it if present.
    pub fn remove(&self, id: &str) -> Option<Member> {
        self.members.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Member> {
        self.members.read().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.members.read().len()
    }

    /// Snapshot of the current roster.
    pub fn members(&self) -> Vec<Member> {
        self.members.read().values().cloned().collect()
    }

    /// Replace the roster from a subscription acknowledgement payload of the
    /// shape `{"presence": {"hash": {"<id>": <info>, ...}}}`. Non-object info
    /// values are kept as empty objects.
    pub fn replace_from_presence(&self, data: &Value) {
        let mut roster = HashMap::new();

        if let Some(hash) = data
            .get("presence")
            .and_then(|p| p.get("hash"))
            .and_then(|h| h.as_object())
        {
            for (id, info) in hash {
                let info = if info.is_object() {
                    info.clone()
                } else {
                    Value::Object(serde_json::Map::new())
                };
                roster.insert(id.clone(), Member::new(id.clone(), info));
            }
        }

        *self.members.write() = roster;
    }

    /// Drop every member. Called when the channel leaves the subscribed state.
    pub fn clear(&self) {
        self.members.write().clear();
    }
}
