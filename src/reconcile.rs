//! Merge of incoming change events into the entity mirror.
//!
//! One algorithm serves both entity kinds. The hazards are duplicate
//! application (the feed echoes the local user's own writes back) and
//! partial payloads. Reconciliation never fails for a well-formed event;
//! malformed events are logged and still forwarded to the notifier with
//! whatever data they carried.

use serde_json::Value;
use tracing::{debug, warn};

use crate::event::{snapshot_id, ChangeEvent, ChangeKind};
use crate::notify::{ChangeBus, ChangeNotice, ChangeOp};
use crate::record::BoardRecord;
use crate::store::EntityStore;

/// Ambient facts the merge needs: which project the mirror tracks and who
/// the session user is (for the self-echo guard).
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub project_id: String,
    pub session_user: Option<String>,
}

/// Apply one event to `store`, notifying `bus` once per applied change.
pub fn apply<T: BoardRecord>(
    store: &mut EntityStore<T>,
    bus: &mut ChangeBus<T>,
    event: &ChangeEvent,
    ctx: &ReconcileContext,
) {
    match event.kind {
        ChangeKind::Insert => apply_insert(store, bus, event, ctx),
        ChangeKind::Update => apply_update(store, bus, event, ctx),
        ChangeKind::Delete => apply_delete(store, bus, event),
    }
}

fn apply_insert<T: BoardRecord>(
    store: &mut EntityStore<T>,
    bus: &mut ChangeBus<T>,
    event: &ChangeEvent,
    ctx: &ReconcileContext,
) {
    let Some(record) = parse_snapshot::<T>(event.new.as_ref()) else {
        forward_partial(bus, ChangeOp::Insert, event);
        return;
    };
    if record.project_id() != ctx.project_id {
        warn!(
            kind = T::KIND.as_str(),
            id = record.id(),
            project = record.project_id(),
            "dropping insert for foreign project"
        );
        return;
    }
    // Primary self-echo guard: the optimistic local write already put it in.
    if store.contains(record.id()) {
        debug!(kind = T::KIND.as_str(), id = record.id(), "insert echo absorbed");
        return;
    }
    // Secondary guard for callers that skip the optimistic pre-insert.
    if let (Some(author), Some(user)) = (record.created_by(), ctx.session_user.as_deref()) {
        if author == user {
            debug!(
                kind = T::KIND.as_str(),
                id = record.id(),
                "own insert absorbed by author tag"
            );
            return;
        }
    }
    // A row born soft-deleted never becomes visible.
    if record.is_deleted() {
        debug!(
            kind = T::KIND.as_str(),
            id = record.id(),
            "ignoring insert of soft-deleted row"
        );
        return;
    }
    store.upsert(record.clone());
    if T::ORDERED {
        store.resort();
    }
    bus.emit(&ChangeNotice {
        op: ChangeOp::Insert,
        record: Some(record),
        removed: None,
        event: event.clone(),
    });
}

fn apply_update<T: BoardRecord>(
    store: &mut EntityStore<T>,
    bus: &mut ChangeBus<T>,
    event: &ChangeEvent,
    ctx: &ReconcileContext,
) {
    let Some(new) = event.new.as_ref() else {
        warn!(kind = T::KIND.as_str(), "update event without new snapshot");
        forward_partial(bus, ChangeOp::Update, event);
        return;
    };
    let Some(id) = snapshot_id(new).map(str::to_string) else {
        warn!(kind = T::KIND.as_str(), "update event without identifier");
        forward_partial(bus, ChangeOp::Update, event);
        return;
    };

    // The flag is read from the raw payload so that even a partial deleted
    // row (id + flag and nothing else) still projects as removal.
    let soft_deleted = new
        .get("is_deleted")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if soft_deleted {
        if let Some(prior) = store.remove(&id) {
            debug!(kind = T::KIND.as_str(), id = id.as_str(), "soft delete projected as removal");
            bus.emit(&ChangeNotice {
                op: ChangeOp::SoftDelete,
                record: None,
                removed: Some(prior),
                event: event.clone(),
            });
        } else {
            debug!(kind = T::KIND.as_str(), id = id.as_str(), "soft delete for absent row");
        }
        return;
    }

    // Field-by-field overlay onto the local snapshot: keys absent from the
    // payload keep their local values, so a partial remote row cannot
    // clobber them. An id unseen locally needs the full row.
    let merged = match store.get(&id) {
        Some(current) => merge_snapshot(current, new),
        None => serde_json::from_value::<T>(new.clone()),
    };
    let record = match merged {
        Ok(record) => record,
        Err(err) => {
            warn!(
                kind = T::KIND.as_str(),
                id = id.as_str(),
                error = %err,
                "unusable update snapshot"
            );
            forward_partial(bus, ChangeOp::Update, event);
            return;
        }
    };
    if record.project_id() != ctx.project_id {
        warn!(
            kind = T::KIND.as_str(),
            id = record.id(),
            project = record.project_id(),
            "dropping update for foreign project"
        );
        return;
    }
    store.upsert(record.clone());
    if T::ORDERED {
        store.resort();
    }
    bus.emit(&ChangeNotice {
        op: ChangeOp::Update,
        record: Some(record),
        removed: None,
        event: event.clone(),
    });
}

fn apply_delete<T: BoardRecord>(
    store: &mut EntityStore<T>,
    bus: &mut ChangeBus<T>,
    event: &ChangeEvent,
) {
    // The identifier comes from the old snapshot; the new one is empty on
    // DELETE.
    let removed = match event.old.as_ref().and_then(snapshot_id) {
        Some(id) => {
            let removed = store.remove(id);
            if removed.is_none() {
                debug!(kind = T::KIND.as_str(), id, "delete for unknown id");
            }
            removed
        }
        None => {
            warn!(kind = T::KIND.as_str(), "delete event without identifier");
            None
        }
    };
    // Unknown ids still notify: consumers may track the id by other means
    // and want to react to the deletion regardless.
    bus.emit(&ChangeNotice {
        op: ChangeOp::Delete,
        record: None,
        removed,
        event: event.clone(),
    });
}

fn parse_snapshot<T: BoardRecord>(snapshot: Option<&Value>) -> Option<T> {
    let value = snapshot?;
    match serde_json::from_value::<T>(value.clone()) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(kind = T::KIND.as_str(), error = %err, "unparsable row snapshot");
            None
        }
    }
}

fn merge_snapshot<T: BoardRecord>(current: &T, patch: &Value) -> serde_json::Result<T> {
    let mut base = serde_json::to_value(current)?;
    if let (Value::Object(base), Value::Object(patch)) = (&mut base, patch) {
        for (key, value) in patch {
            base.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(base)
}

fn forward_partial<T: BoardRecord>(bus: &mut ChangeBus<T>, op: ChangeOp, event: &ChangeEvent) {
    bus.emit(&ChangeNotice {
        op,
        record: None,
        removed: None,
        event: event.clone(),
    });
}
