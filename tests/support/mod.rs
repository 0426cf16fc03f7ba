//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use boardsync::engine::BoardEngine;
use boardsync::file_board::FileBoard;
use boardsync::record::{ColumnRecord, TaskRecord};
use chrono::Utc;
use serde_json::{json, Value};

/// Create a board under a fresh temp dir.
pub fn temp_board() -> (tempfile::TempDir, FileBoard) {
    let dir = tempfile::tempdir().expect("tempdir");
    let board = FileBoard::create(dir.path().join("board")).expect("create board");
    (dir, board)
}

pub fn engine_for(project: &str, user: &str) -> BoardEngine {
    let mut engine = BoardEngine::new(Some(user.to_string()));
    engine.set_project(project);
    engine
}

pub fn task(id: &str, project: &str, created_by: &str) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: format!("Task {id}"),
        description: String::new(),
        status: "col-todo".to_string(),
        project_id: project.to_string(),
        created_at: Utc::now(),
        start_task: None,
        end_task: None,
        is_deleted: false,
        created_by: Some(created_by.to_string()),
    }
}

pub fn column(id: &str, project: &str, order: i64) -> ColumnRecord {
    ColumnRecord {
        id: id.to_string(),
        name: format!("Column {id}"),
        project_id: project.to_string(),
        created_at: Utc::now(),
        order,
        is_deleted: false,
        created_by: None,
    }
}

pub fn task_row(id: &str, project: &str, created_by: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Task {id}"),
        "description": "",
        "status": "col-todo",
        "project_id": project,
        "created_at": "2025-03-01T10:00:00Z",
        "is_deleted": false,
        "created_by": created_by,
    })
}

pub fn column_row(id: &str, project: &str, order: i64) -> Value {
    json!({
        "id": id,
        "name": format!("Column {id}"),
        "project_id": project,
        "created_at": "2025-03-01T10:00:00Z",
        "order": order,
        "is_deleted": false,
    })
}

/// Poll the engine until `pred` holds or `timeout` elapses.
pub fn wait_for<F>(engine: &mut BoardEngine, timeout: Duration, pred: F) -> bool
where
    F: Fn(&BoardEngine) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if pred(engine) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        engine.poll(Duration::from_millis(100));
    }
}
