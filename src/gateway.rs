//! Optimistic mutation path against the authoritative board store.
//!
//! Every write lands in the local mirror *before* the remote call is issued
//! and is rolled back if that call fails. Created records carry a
//! client-assigned id and the acting user's tag, which is what lets the
//! reconciler recognize the feed echo of a local write (see `reconcile`).

use chrono::Utc;
use uuid::Uuid;

use crate::config::ColumnSpec;
use crate::engine::BoardEngine;
use crate::error::{Error, Result};
use crate::record::{ColumnPatch, ColumnRecord, TaskPatch, TaskRecord};

/// Authoritative store interface. Implementations perform the actual
/// request/response calls; the engine only ever consumes their feed echoes.
pub trait RemoteBoard {
    fn fetch_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>>;
    fn fetch_columns(&self, project_id: &str) -> Result<Vec<ColumnRecord>>;
    fn insert_task(&self, task: &TaskRecord) -> Result<()>;
    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<TaskRecord>;
    fn delete_task(&self, id: &str) -> Result<()>;
    fn insert_column(&self, column: &ColumnRecord) -> Result<()>;
    fn update_column(&self, id: &str, patch: &ColumnPatch) -> Result<ColumnRecord>;
    fn delete_column(&self, id: &str) -> Result<()>;
}

/// Input for a task creation.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    /// Column the task starts in.
    pub status: String,
}

/// Input for a column creation.
#[derive(Debug, Clone)]
pub struct NewColumn {
    pub name: String,
    /// Board position; unset lands the column at the end.
    pub order: Option<i64>,
}

pub fn create_task(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    input: NewTask,
) -> Result<TaskRecord> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(Error::InvalidArgument("task title cannot be empty".to_string()));
    }
    let project_id = active_project(engine)?;
    let task = TaskRecord {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        description: input.description,
        status: input.status,
        project_id,
        created_at: Utc::now(),
        start_task: None,
        end_task: None,
        is_deleted: false,
        created_by: engine.session_user().map(str::to_string),
    };
    engine.upsert_task_local(task.clone())?;
    if let Err(err) = remote.insert_task(&task) {
        engine.remove_task_local(&task.id);
        return Err(err);
    }
    Ok(task)
}

pub fn update_task(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    id: &str,
    patch: TaskPatch,
) -> Result<TaskRecord> {
    let current = engine
        .task(id)
        .cloned()
        .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
    let updated = patch.apply_to(&current);
    engine.upsert_task_local(updated)?;
    match remote.update_task(id, &patch) {
        Ok(row) => Ok(row),
        Err(err) => {
            let _ = engine.upsert_task_local(current);
            Err(err)
        }
    }
}

/// Move a task to another column.
pub fn move_task(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    id: &str,
    status: &str,
) -> Result<TaskRecord> {
    update_task(
        engine,
        remote,
        id,
        TaskPatch {
            status: Some(status.to_string()),
            ..TaskPatch::default()
        },
    )
}

/// Flip the soft-delete flag remotely; the mirror drops the row right away.
pub fn soft_delete_task(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    id: &str,
) -> Result<TaskRecord> {
    let prior = engine
        .remove_task_local(id)
        .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
    let patch = TaskPatch {
        is_deleted: Some(true),
        ..TaskPatch::default()
    };
    if let Err(err) = remote.update_task(id, &patch) {
        let _ = engine.upsert_task_local(prior.clone());
        return Err(err);
    }
    Ok(prior)
}

/// Physically delete a task. Ids unknown to the mirror are forwarded to the
/// remote unchanged; it is authoritative about whether that is an error.
pub fn delete_task(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    id: &str,
) -> Result<Option<TaskRecord>> {
    let prior = engine.remove_task_local(id);
    if let Err(err) = remote.delete_task(id) {
        if let Some(prior) = prior {
            let _ = engine.upsert_task_local(prior);
        }
        return Err(err);
    }
    Ok(prior)
}

pub fn create_column(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    input: NewColumn,
) -> Result<ColumnRecord> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument("column name cannot be empty".to_string()));
    }
    let project_id = active_project(engine)?;
    let order = input.order.unwrap_or_else(|| next_column_order(engine));
    let column = ColumnRecord {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        project_id,
        created_at: Utc::now(),
        order,
        is_deleted: false,
        created_by: engine.session_user().map(str::to_string),
    };
    engine.upsert_column_local(column.clone())?;
    if let Err(err) = remote.insert_column(&column) {
        engine.remove_column_local(&column.id);
        return Err(err);
    }
    Ok(column)
}

pub fn update_column(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    id: &str,
    patch: ColumnPatch,
) -> Result<ColumnRecord> {
    let current = engine
        .column(id)
        .cloned()
        .ok_or_else(|| Error::ColumnNotFound(id.to_string()))?;
    let updated = patch.apply_to(&current);
    engine.upsert_column_local(updated)?;
    match remote.update_column(id, &patch) {
        Ok(row) => Ok(row),
        Err(err) => {
            let _ = engine.upsert_column_local(current);
            Err(err)
        }
    }
}

pub fn rename_column(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    id: &str,
    name: &str,
) -> Result<ColumnRecord> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument("column name cannot be empty".to_string()));
    }
    update_column(
        engine,
        remote,
        id,
        ColumnPatch {
            name: Some(name.to_string()),
            ..ColumnPatch::default()
        },
    )
}

pub fn move_column(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    id: &str,
    order: i64,
) -> Result<ColumnRecord> {
    update_column(
        engine,
        remote,
        id,
        ColumnPatch {
            order: Some(order),
            ..ColumnPatch::default()
        },
    )
}

/// Columns are soft-deleted, never physically removed by the gateway.
pub fn soft_delete_column(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    id: &str,
) -> Result<ColumnRecord> {
    let prior = engine
        .remove_column_local(id)
        .ok_or_else(|| Error::ColumnNotFound(id.to_string()))?;
    let patch = ColumnPatch {
        is_deleted: Some(true),
        ..ColumnPatch::default()
    };
    if let Err(err) = remote.update_column(id, &patch) {
        let _ = engine.upsert_column_local(prior.clone());
        return Err(err);
    }
    Ok(prior)
}

/// Batch-create the configured default columns for a fresh project.
pub fn init_project_columns(
    engine: &mut BoardEngine,
    remote: &dyn RemoteBoard,
    specs: &[ColumnSpec],
) -> Result<Vec<ColumnRecord>> {
    let mut created = Vec::with_capacity(specs.len());
    for spec in specs {
        created.push(create_column(
            engine,
            remote,
            NewColumn {
                name: spec.name.clone(),
                order: Some(spec.order),
            },
        )?);
    }
    Ok(created)
}

fn active_project(engine: &BoardEngine) -> Result<String> {
    engine
        .project_id()
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidArgument("no active project".to_string()))
}

fn next_column_order(engine: &BoardEngine) -> i64 {
    engine
        .columns()
        .iter()
        .map(|column| column.order)
        .max()
        .map_or(0, |max| max + 1)
}
