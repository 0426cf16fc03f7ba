//! File-backed board: a reference implementation of the remote store and
//! its change feed, for demos, tests and single-machine collaboration.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   board.json      # authoritative snapshot; soft-deleted rows stay put
//!   changes.jsonl   # append-only change log, one entry per committed write
//!   board.lock      # flock taken around every write
//! ```
//!
//! Writers lock `board.lock`, rewrite the snapshot atomically and append
//! the feed entry, so the snapshot and the log never disagree about a
//! committed write. Subscriptions tail `changes.jsonl` from the current end
//! of file on a worker thread, woken by filesystem notifications with a
//! polling fallback.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::event::{ChangeEvent, ChangeKind, FeedMessage};
use crate::feed::{ChangeFeed, FeedSubscription, FeedTopic};
use crate::gateway::RemoteBoard;
use crate::lock::{write_atomic, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::record::{ColumnPatch, ColumnRecord, EntityKind, TaskPatch, TaskRecord};

const BOARD_FILE: &str = "board.json";
const CHANGES_FILE: &str = "changes.jsonl";
const LOCK_FILE: &str = "board.lock";
const BOARD_SCHEMA_VERSION: &str = "boardsync.board.v1";
const FEED_POLL_MS: u64 = 200;

/// Authoritative board contents. Rows survive soft deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub tasks: Vec<TaskRecord>,
    pub columns: Vec<ColumnRecord>,
}

impl BoardSnapshot {
    pub fn empty() -> Self {
        Self {
            schema_version: BOARD_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            tasks: Vec::new(),
            columns: Vec::new(),
        }
    }
}

/// One committed change on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub event_id: String,
    pub project_id: String,
    pub entity: EntityKind,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    pub committed_at: DateTime<Utc>,
}

impl FeedEntry {
    fn new(
        project_id: impl Into<String>,
        entity: EntityKind,
        kind: ChangeKind,
        new: Option<Value>,
        old: Option<Value>,
    ) -> Self {
        Self {
            event_id: Ulid::new().to_string(),
            project_id: project_id.into(),
            entity,
            kind,
            new,
            old,
            committed_at: Utc::now(),
        }
    }

    pub fn into_event(self) -> ChangeEvent {
        ChangeEvent {
            kind: self.kind,
            new: self.new,
            old: self.old,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileBoard {
    dir: PathBuf,
}

impl FileBoard {
    /// Use an existing board directory without touching it.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the directory and empty board files if they are missing.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let board = Self::new(dir);
        fs::create_dir_all(&board.dir)?;
        if !board.board_path().exists() {
            let snapshot = BoardSnapshot::empty();
            write_atomic(
                board.board_path(),
                serde_json::to_string_pretty(&snapshot)?.as_bytes(),
            )?;
        }
        if !board.changes_path().exists() {
            File::create(board.changes_path())?;
        }
        Ok(board)
    }

    /// Open an existing board directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let board = Self::new(dir);
        if !board.board_path().exists() {
            return Err(Error::BoardNotFound(board.dir.clone()));
        }
        Ok(board)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn board_path(&self) -> PathBuf {
        self.dir.join(BOARD_FILE)
    }

    fn changes_path(&self) -> PathBuf {
        self.dir.join(CHANGES_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Read the current snapshot. An absent file reads as an empty board.
    pub fn load(&self) -> Result<BoardSnapshot> {
        let path = self.board_path();
        if !path.exists() {
            return Ok(BoardSnapshot::empty());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn store(&self, snapshot: &mut BoardSnapshot) -> Result<()> {
        snapshot.generated_at = Utc::now();
        write_atomic(
            self.board_path(),
            serde_json::to_string_pretty(snapshot)?.as_bytes(),
        )
    }

    fn append_entry(&self, entry: &FeedEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.changes_path())?;
        writeln!(file, "{json}")?;
        file.sync_all()?;
        Ok(())
    }

    /// Locked read-modify-write over the snapshot plus the matching feed
    /// append, so concurrent writers serialize and the log mirrors every
    /// committed state change.
    fn commit<F, R>(&self, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut BoardSnapshot) -> Result<(R, FeedEntry)>,
    {
        let _lock = FileLock::acquire(self.lock_path(), DEFAULT_LOCK_TIMEOUT_MS)?;
        let mut snapshot = self.load()?;
        let (result, entry) = mutate(&mut snapshot)?;
        self.store(&mut snapshot)?;
        self.append_entry(&entry)?;
        Ok(result)
    }
}

impl RemoteBoard for FileBoard {
    fn fetch_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>> {
        let snapshot = self.load()?;
        Ok(snapshot
            .tasks
            .into_iter()
            .filter(|task| task.project_id == project_id && !task.is_deleted)
            .collect())
    }

    fn fetch_columns(&self, project_id: &str) -> Result<Vec<ColumnRecord>> {
        let snapshot = self.load()?;
        let mut columns: Vec<ColumnRecord> = snapshot
            .columns
            .into_iter()
            .filter(|column| column.project_id == project_id && !column.is_deleted)
            .collect();
        columns.sort_by_key(|column| column.order);
        Ok(columns)
    }

    fn insert_task(&self, task: &TaskRecord) -> Result<()> {
        self.commit(|snapshot| {
            if snapshot.tasks.iter().any(|row| row.id == task.id) {
                return Err(Error::InvalidArgument(format!(
                    "task already exists: {}",
                    task.id
                )));
            }
            snapshot.tasks.push(task.clone());
            let entry = FeedEntry::new(
                &task.project_id,
                EntityKind::Task,
                ChangeKind::Insert,
                Some(serde_json::to_value(task)?),
                None,
            );
            Ok(((), entry))
        })
    }

    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<TaskRecord> {
        self.commit(|snapshot| {
            let row = snapshot
                .tasks
                .iter_mut()
                .find(|row| row.id == id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            let before = row.clone();
            *row = patch.apply_to(&before);
            let after = row.clone();
            let entry = FeedEntry::new(
                &after.project_id,
                EntityKind::Task,
                ChangeKind::Update,
                Some(serde_json::to_value(&after)?),
                Some(serde_json::to_value(&before)?),
            );
            Ok((after, entry))
        })
    }

    fn delete_task(&self, id: &str) -> Result<()> {
        self.commit(|snapshot| {
            let pos = snapshot
                .tasks
                .iter()
                .position(|row| row.id == id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            let removed = snapshot.tasks.remove(pos);
            let entry = FeedEntry::new(
                &removed.project_id,
                EntityKind::Task,
                ChangeKind::Delete,
                None,
                Some(serde_json::to_value(&removed)?),
            );
            Ok(((), entry))
        })
    }

    fn insert_column(&self, column: &ColumnRecord) -> Result<()> {
        self.commit(|snapshot| {
            if snapshot.columns.iter().any(|row| row.id == column.id) {
                return Err(Error::InvalidArgument(format!(
                    "column already exists: {}",
                    column.id
                )));
            }
            snapshot.columns.push(column.clone());
            let entry = FeedEntry::new(
                &column.project_id,
                EntityKind::Column,
                ChangeKind::Insert,
                Some(serde_json::to_value(column)?),
                None,
            );
            Ok(((), entry))
        })
    }

    fn update_column(&self, id: &str, patch: &ColumnPatch) -> Result<ColumnRecord> {
        self.commit(|snapshot| {
            let row = snapshot
                .columns
                .iter_mut()
                .find(|row| row.id == id)
                .ok_or_else(|| Error::ColumnNotFound(id.to_string()))?;
            let before = row.clone();
            *row = patch.apply_to(&before);
            let after = row.clone();
            let entry = FeedEntry::new(
                &after.project_id,
                EntityKind::Column,
                ChangeKind::Update,
                Some(serde_json::to_value(&after)?),
                Some(serde_json::to_value(&before)?),
            );
            Ok((after, entry))
        })
    }

    fn delete_column(&self, id: &str) -> Result<()> {
        self.commit(|snapshot| {
            let pos = snapshot
                .columns
                .iter()
                .position(|row| row.id == id)
                .ok_or_else(|| Error::ColumnNotFound(id.to_string()))?;
            let removed = snapshot.columns.remove(pos);
            let entry = FeedEntry::new(
                &removed.project_id,
                EntityKind::Column,
                ChangeKind::Delete,
                None,
                Some(serde_json::to_value(&removed)?),
            );
            Ok(((), entry))
        })
    }
}

impl ChangeFeed for FileBoard {
    fn subscribe(
        &self,
        topic: &FeedTopic,
        sender: Sender<FeedMessage>,
    ) -> Result<Box<dyn FeedSubscription>> {
        let changes_path = self.changes_path();
        // Only entries committed after this point are delivered; current
        // state comes from the snapshot, as with any initial fetch.
        let start_offset = fs::metadata(&changes_path).map(|meta| meta.len()).unwrap_or(0);

        // The watcher is created on the caller's thread so setup failures
        // surface synchronously, per the subscription contract.
        let (wake_tx, wake_rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = wake_tx.send(res);
        })
        .map_err(|err| Error::Subscribe {
            channel: topic.channel(),
            reason: err.to_string(),
        })?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|err| Error::Subscribe {
                channel: topic.channel(),
                reason: err.to_string(),
            })?;

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker_topic = topic.clone();
        thread::spawn(move || {
            // Keep the watcher alive for the lifetime of the tail loop.
            let _watcher = watcher;
            let mut offset = start_offset;
            let poll = Duration::from_millis(FEED_POLL_MS);
            loop {
                if worker_stop.load(Ordering::Relaxed) {
                    break;
                }
                match wake_rx.recv_timeout(poll) {
                    Ok(Ok(_)) | Err(RecvTimeoutError::Timeout) => {}
                    Ok(Err(err)) => {
                        warn!(channel = %worker_topic.channel(), error = %err, "feed watcher error");
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                match drain_entries(&changes_path, offset, &worker_topic, &sender) {
                    Ok((next_offset, receiver_gone)) => {
                        offset = next_offset;
                        if receiver_gone {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(channel = %worker_topic.channel(), error = %err, "feed tail error");
                    }
                }
            }
        });

        Ok(Box::new(FileSubscription {
            topic: topic.clone(),
            stop,
        }))
    }
}

/// Read newly appended feed entries and forward the matching ones.
/// Returns the new offset and whether the receiving side is gone.
fn drain_entries(
    path: &Path,
    start: u64,
    topic: &FeedTopic,
    sender: &Sender<FeedMessage>,
) -> Result<(u64, bool)> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok((start, false)),
        Err(err) => return Err(err.into()),
    };
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(start))?;

    let mut offset = start;
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        if !line.ends_with('\n') {
            // Writer mid-append; pick the line up on the next wakeup.
            break;
        }
        offset += read as u64;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: FeedEntry = match serde_json::from_str(trimmed) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unparsable feed entry");
                continue;
            }
        };
        if !topic.matches(&entry.project_id, entry.entity) {
            continue;
        }
        let message = FeedMessage {
            entity: entry.entity,
            event: entry.into_event(),
        };
        if sender.send(message).is_err() {
            return Ok((offset, true));
        }
    }
    Ok((offset, false))
}

struct FileSubscription {
    topic: FeedTopic,
    stop: Arc<AtomicBool>,
}

impl FeedSubscription for FileSubscription {
    fn topic(&self) -> &FeedTopic {
        &self.topic
    }
}

impl Drop for FileSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn board() -> (tempfile::TempDir, FileBoard) {
        let dir = tempfile::tempdir().expect("tempdir");
        let board = FileBoard::create(dir.path().join("board")).expect("create board");
        (dir, board)
    }

    fn task(id: &str, project: &str) -> TaskRecord {
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
            created_by: Some("alice".to_string()),
        }
    }

    fn recv_message(
        receiver: &mpsc::Receiver<FeedMessage>,
        within: Duration,
    ) -> Option<FeedMessage> {
        let deadline = Instant::now() + within;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            if let Ok(message) = receiver.recv_timeout(left) {
                return Some(message);
            }
        }
    }

    #[test]
    fn open_requires_an_existing_board() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            FileBoard::open(dir.path().join("nope")),
            Err(Error::BoardNotFound(_))
        ));
    }

    #[test]
    fn insert_then_fetch_round_trips() {
        let (_dir, board) = board();
        board.insert_task(&task("t1", "prj-1")).expect("insert");
        board.insert_task(&task("t2", "prj-2")).expect("insert");

        let tasks = board.fetch_tasks("prj-1").expect("fetch");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (_dir, board) = board();
        board.insert_task(&task("t1", "prj-1")).expect("insert");
        assert!(board.insert_task(&task("t1", "prj-1")).is_err());
    }

    #[test]
    fn soft_deleted_rows_stay_in_snapshot_but_not_in_fetch() {
        let (_dir, board) = board();
        board.insert_task(&task("t1", "prj-1")).expect("insert");
        board
            .update_task(
                "t1",
                &TaskPatch {
                    is_deleted: Some(true),
                    ..TaskPatch::default()
                },
            )
            .expect("soft delete");

        assert!(board.fetch_tasks("prj-1").expect("fetch").is_empty());
        let snapshot = board.load().expect("snapshot");
        assert_eq!(snapshot.tasks.len(), 1);
        assert!(snapshot.tasks[0].is_deleted);
    }

    #[test]
    fn update_entry_carries_old_and_new_snapshots() {
        let (_dir, board) = board();
        board.insert_task(&task("t1", "prj-1")).expect("insert");
        board
            .update_task(
                "t1",
                &TaskPatch {
                    status: Some("col-done".to_string()),
                    ..TaskPatch::default()
                },
            )
            .expect("update");

        let log = fs::read_to_string(board.changes_path()).expect("log");
        let last = log.lines().last().expect("update entry");
        let entry: FeedEntry = serde_json::from_str(last).expect("parse entry");
        assert_eq!(entry.kind, ChangeKind::Update);
        let new = entry.new.expect("new snapshot");
        let old = entry.old.expect("old snapshot");
        assert_eq!(new.get("status").and_then(Value::as_str), Some("col-done"));
        assert_eq!(old.get("status").and_then(Value::as_str), Some("col-todo"));
    }

    #[test]
    fn subscription_delivers_only_later_entries_for_the_topic() {
        let (_dir, board) = board();
        board.insert_task(&task("t0", "prj-1")).expect("pre-existing");

        let (sender, receiver) = mpsc::channel();
        let _sub = board
            .subscribe(&FeedTopic::new("prj-1", EntityKind::Task), sender)
            .expect("subscribe");

        board.insert_task(&task("t1", "prj-1")).expect("insert");
        board.insert_task(&task("t2", "prj-2")).expect("other project");

        let message = recv_message(&receiver, Duration::from_secs(5)).expect("feed message");
        assert_eq!(message.event.record_id(), Some("t1"));
        // t0 predates the subscription and t2 is out of scope.
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let (_dir, board) = board();
        let (sender, receiver) = mpsc::channel();
        let sub = board
            .subscribe(&FeedTopic::new("prj-1", EntityKind::Task), sender)
            .expect("subscribe");
        drop(sub);
        // Give the worker a moment to observe the stop flag.
        thread::sleep(Duration::from_millis(2 * FEED_POLL_MS + 100));

        board.insert_task(&task("t1", "prj-1")).expect("insert");
        assert!(recv_message(&receiver, Duration::from_millis(600)).is_none());
    }
}
