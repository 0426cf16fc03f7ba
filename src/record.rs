//! Task and column records mirrored from the remote board.
//!
//! Rows are soft-deleted upstream: `is_deleted` flips to true and the row
//! stays in the backing store forever. The local mirror projects that flag
//! as removal, so no record held in an `EntityStore` ever has it set.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Entity kinds carried by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Column,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Column => "column",
        }
    }
}

/// Behavior the reconciler and stores need from a mirrored record.
pub trait BoardRecord: Clone + Serialize + DeserializeOwned {
    const KIND: EntityKind;

    /// Whether the collection keeps a sort order over [`sort_key`](Self::sort_key).
    const ORDERED: bool = false;

    fn id(&self) -> &str;
    fn project_id(&self) -> &str;
    fn is_deleted(&self) -> bool;

    /// Acting user recorded at creation time, used by the self-echo guard.
    fn created_by(&self) -> Option<&str>;

    fn sort_key(&self) -> i64 {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Column the task sits in.
    pub status: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_task: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_task: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl BoardRecord for TaskRecord {
    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> &str {
        &self.id
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRecord {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    /// Position on the board. Not necessarily contiguous; ascending
    /// comparison defines the total order, ties stay stable.
    pub order: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl BoardRecord for ColumnRecord {
    const KIND: EntityKind = EntityKind::Column;
    const ORDERED: bool = true;

    fn id(&self) -> &str {
        &self.id
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    fn sort_key(&self) -> i64 {
        self.order
    }
}

/// Partial update for a task; unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_task: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_task: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

impl TaskPatch {
    pub fn apply_to(&self, task: &TaskRecord) -> TaskRecord {
        let mut updated = task.clone();
        if let Some(title) = &self.title {
            updated.title = title.clone();
        }
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(status) = &self.status {
            updated.status = status.clone();
        }
        if let Some(start_task) = self.start_task {
            updated.start_task = Some(start_task);
        }
        if let Some(end_task) = self.end_task {
            updated.end_task = Some(end_task);
        }
        if let Some(is_deleted) = self.is_deleted {
            updated.is_deleted = is_deleted;
        }
        updated
    }
}

/// Partial update for a column; unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ColumnPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

impl ColumnPatch {
    pub fn apply_to(&self, column: &ColumnRecord) -> ColumnRecord {
        let mut updated = column.clone();
        if let Some(name) = &self.name {
            updated.name = name.clone();
        }
        if let Some(order) = self.order {
            updated.order = order;
        }
        if let Some(is_deleted) = self.is_deleted {
            updated.is_deleted = is_deleted;
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TaskRecord {
        TaskRecord {
            id: "t1".to_string(),
            title: "Write report".to_string(),
            description: "quarterly numbers".to_string(),
            status: "col-todo".to_string(),
            project_id: "prj-1".to_string(),
            created_at: Utc::now(),
            start_task: None,
            end_task: None,
            is_deleted: false,
            created_by: Some("alice".to_string()),
        }
    }

    #[test]
    fn task_patch_keeps_unset_fields() {
        let patch = TaskPatch {
            status: Some("col-done".to_string()),
            ..TaskPatch::default()
        };
        let updated = patch.apply_to(&task());
        assert_eq!(updated.status, "col-done");
        assert_eq!(updated.title, "Write report");
        assert_eq!(updated.description, "quarterly numbers");
        assert_eq!(updated.created_by.as_deref(), Some("alice"));
    }

    #[test]
    fn partial_task_row_deserializes_with_defaults() {
        let row = serde_json::json!({
            "id": "t2",
            "title": "Triage",
            "status": "col-todo",
            "project_id": "prj-1",
            "created_at": "2025-03-01T10:00:00Z",
        });
        let task: TaskRecord = serde_json::from_value(row).expect("task row");
        assert_eq!(task.description, "");
        assert!(!task.is_deleted);
        assert!(task.created_by.is_none());
    }
}
