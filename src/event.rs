//! Change events delivered by the board's change feed.
//!
//! Snapshots stay as raw JSON until reconciliation: the remote is free to
//! deliver partial rows (DELETE old-snapshots often carry little more than
//! the identifier), and the reconciler decides what is usable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::EntityKind;

/// Row-level change kinds, as committed by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change event, scoped server-side to a single project.
///
/// INSERT carries `new`, DELETE carries `old`, UPDATE may carry both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn insert(new: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(new),
            old: None,
        }
    }

    pub fn update(new: Value, old: Option<Value>) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(new),
            old,
        }
    }

    pub fn delete(old: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// Identifier of the affected record, best effort.
    ///
    /// INSERT and UPDATE read the new snapshot, DELETE the old one.
    pub fn record_id(&self) -> Option<&str> {
        let snapshot = match self.kind {
            ChangeKind::Delete => self.old.as_ref(),
            ChangeKind::Insert | ChangeKind::Update => self.new.as_ref(),
        };
        snapshot.and_then(snapshot_id)
    }
}

/// Identifier field of a raw row snapshot, if present.
pub fn snapshot_id(snapshot: &Value) -> Option<&str> {
    snapshot.get("id").and_then(Value::as_str)
}

/// A change event routed to the engine, tagged with the entity kind of the
/// feed it arrived on.
#[derive(Debug, Clone)]
pub struct FeedMessage {
    pub entity: EntityKind,
    pub event: ChangeEvent,
}
