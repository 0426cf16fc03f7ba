//! The board engine: mirror, reconciler and feed plumbing for one project.
//!
//! All store mutation happens on the owner's thread: transports push into
//! an mpsc channel and the engine drains it from
//! [`pump`](BoardEngine::pump) / [`poll`](BoardEngine::poll). The stores
//! need no locks, and feed merges are naturally serialized with the local
//! user's optimistic writes. The one ordering hazard left, a local write
//! racing its own feed echo, is resolved in `reconcile`, not with locking.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::event::FeedMessage;
use crate::feed::{ChangeFeed, Subscriber};
use crate::notify::{ChangeBus, ChangeNotice, ListenerId};
use crate::reconcile::{self, ReconcileContext};
use crate::record::{BoardRecord, ColumnRecord, EntityKind, TaskRecord};
use crate::store::EntityStore;

pub struct BoardEngine {
    project_id: Option<String>,
    session_user: Option<String>,
    tasks: EntityStore<TaskRecord>,
    columns: EntityStore<ColumnRecord>,
    task_bus: ChangeBus<TaskRecord>,
    column_bus: ChangeBus<ColumnRecord>,
    subscriber: Subscriber,
    sender: Sender<FeedMessage>,
    receiver: Receiver<FeedMessage>,
}

impl BoardEngine {
    pub fn new(session_user: Option<String>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            project_id: None,
            session_user,
            tasks: EntityStore::new(),
            columns: EntityStore::new(),
            task_bus: ChangeBus::new(),
            column_bus: ChangeBus::new(),
            subscriber: Subscriber::new(),
            sender,
            receiver,
        }
    }

    pub fn session_user(&self) -> Option<&str> {
        self.session_user.as_deref()
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Point the mirror at a project. Switching projects drops both
    /// collections; events still queued for the old project are rejected
    /// by the reconciler's project guard when drained.
    pub fn set_project(&mut self, project_id: &str) {
        if self.project_id.as_deref() == Some(project_id) {
            return;
        }
        self.tasks.clear();
        self.columns.clear();
        self.project_id = Some(project_id.to_string());
    }

    /// Subscribe to the project's change feeds.
    ///
    /// Idempotent: existing subscriptions are torn down first, so repeated
    /// calls never leave a stale project subscribed. On failure the mirror
    /// keeps its last-known-good contents and no subscription stays live.
    pub fn start(&mut self, feed: &dyn ChangeFeed, project_id: &str) -> Result<()> {
        self.set_project(project_id);
        self.subscriber.start(feed, project_id, &self.sender)
    }

    /// Tear down the feed subscriptions. The mirror keeps its contents.
    pub fn stop(&mut self) {
        self.subscriber.stop();
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriber.is_active()
    }

    /// Drain every queued feed event into the mirror. Returns the number of
    /// events processed.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(message) = self.receiver.try_recv() {
            self.dispatch(message);
            processed += 1;
        }
        processed
    }

    /// Wait up to `timeout` for one feed event, then drain the rest.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => {
                self.dispatch(message);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn dispatch(&mut self, message: FeedMessage) {
        let Some(project_id) = self.project_id.clone() else {
            debug!("dropping feed event: no active project");
            return;
        };
        let ctx = ReconcileContext {
            project_id,
            session_user: self.session_user.clone(),
        };
        match message.entity {
            EntityKind::Task => {
                reconcile::apply(&mut self.tasks, &mut self.task_bus, &message.event, &ctx)
            }
            EntityKind::Column => {
                reconcile::apply(&mut self.columns, &mut self.column_bus, &message.event, &ctx)
            }
        }
    }

    /// Replace the task mirror with rows from an initial fetch.
    /// Soft-deleted rows and rows from other projects are projected out.
    pub fn seed_tasks(&mut self, rows: Vec<TaskRecord>) {
        self.tasks.clear();
        for row in rows {
            if self.accepts(&row) {
                self.tasks.upsert(row);
            }
        }
    }

    /// Replace the column mirror with rows from an initial fetch, sorted by
    /// board order.
    pub fn seed_columns(&mut self, rows: Vec<ColumnRecord>) {
        self.columns.clear();
        for row in rows {
            if self.accepts(&row) {
                self.columns.upsert(row);
            }
        }
        self.columns.resort();
    }

    fn accepts<T: BoardRecord>(&self, row: &T) -> bool {
        !row.is_deleted() && self.project_id.as_deref() == Some(row.project_id())
    }

    /// Optimistic write hook for the mutation gateway; call before issuing
    /// the remote mutation so the feed echo is absorbed as a duplicate.
    ///
    /// Does not notify the change bus: the caller already observed its own
    /// change, and other collaborators hear about it through their feeds.
    pub fn upsert_task_local(&mut self, task: TaskRecord) -> Result<()> {
        self.check_local(&task)?;
        self.tasks.upsert(task);
        Ok(())
    }

    /// Optimistic removal hook. Absent ids are a no-op.
    pub fn remove_task_local(&mut self, id: &str) -> Option<TaskRecord> {
        self.tasks.remove(id)
    }

    pub fn upsert_column_local(&mut self, column: ColumnRecord) -> Result<()> {
        self.check_local(&column)?;
        self.columns.upsert(column);
        self.columns.resort();
        Ok(())
    }

    pub fn remove_column_local(&mut self, id: &str) -> Option<ColumnRecord> {
        self.columns.remove(id)
    }

    fn check_local<T: BoardRecord>(&self, record: &T) -> Result<()> {
        if record.is_deleted() {
            return Err(Error::InvalidArgument(format!(
                "refusing to mirror soft-deleted {} {}",
                T::KIND.as_str(),
                record.id()
            )));
        }
        match self.project_id.as_deref() {
            Some(project) if project == record.project_id() => Ok(()),
            Some(project) => Err(Error::InvalidArgument(format!(
                "{} {} belongs to project {}, active project is {project}",
                T::KIND.as_str(),
                record.id(),
                record.project_id()
            ))),
            None => Err(Error::InvalidArgument("no active project".to_string())),
        }
    }

    pub fn tasks(&self) -> &[TaskRecord] {
        self.tasks.as_slice()
    }

    pub fn columns(&self) -> &[ColumnRecord] {
        self.columns.as_slice()
    }

    pub fn task(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    pub fn column(&self, id: &str) -> Option<&ColumnRecord> {
        self.columns.get(id)
    }

    pub fn on_task_change(
        &mut self,
        listener: impl FnMut(&ChangeNotice<TaskRecord>) + 'static,
    ) -> ListenerId {
        self.task_bus.subscribe(listener)
    }

    pub fn on_column_change(
        &mut self,
        listener: impl FnMut(&ChangeNotice<ColumnRecord>) + 'static,
    ) -> ListenerId {
        self.column_bus.subscribe(listener)
    }

    pub fn unsubscribe_tasks(&mut self, id: ListenerId) -> bool {
        self.task_bus.unsubscribe(id)
    }

    pub fn unsubscribe_columns(&mut self, id: ListenerId) -> bool {
        self.column_bus.unsubscribe(id)
    }
}
