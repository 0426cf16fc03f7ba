//! Change feed subscription plumbing.
//!
//! One subscription per (project, entity kind) pair, scoped by project-id
//! equality on the transport side. Transports push `FeedMessage`s into an
//! mpsc channel owned by the engine; delivery into the mirror happens when
//! the engine drains the channel on its own thread, so the stores are never
//! touched from a transport thread.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::Result;
use crate::event::{ChangeEvent, FeedMessage};
use crate::record::EntityKind;

/// One logical subscription scope: a project crossed with an entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTopic {
    pub project_id: String,
    pub entity: EntityKind,
}

impl FeedTopic {
    pub fn new(project_id: impl Into<String>, entity: EntityKind) -> Self {
        Self {
            project_id: project_id.into(),
            entity,
        }
    }

    /// Channel name for transports and diagnostics, e.g. `task-changes:prj-1`.
    pub fn channel(&self) -> String {
        format!("{}-changes:{}", self.entity.as_str(), self.project_id)
    }

    pub fn matches(&self, project_id: &str, entity: EntityKind) -> bool {
        self.entity == entity && self.project_id == project_id
    }
}

/// Teardown handle for one live subscription; dropping it unsubscribes.
pub trait FeedSubscription {
    fn topic(&self) -> &FeedTopic;
}

/// Transport seam: something that can deliver change events for a topic.
///
/// Implementations push events matching the topic into `sender` from their
/// own threads. Reconnect after a transport-level drop is the transport's
/// concern; subscribers only see steady-state delivery.
pub trait ChangeFeed {
    fn subscribe(
        &self,
        topic: &FeedTopic,
        sender: Sender<FeedMessage>,
    ) -> Result<Box<dyn FeedSubscription>>;
}

/// Owns the live subscription handles for one engine.
#[derive(Default)]
pub struct Subscriber {
    active: Vec<Box<dyn FeedSubscription>>,
}

impl Subscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe both entity feeds for `project_id`.
    ///
    /// Any existing subscriptions are torn down first, so repeated calls
    /// (including with a different project) never leave stale ones live.
    /// On failure no handles are kept and the error is surfaced to the
    /// caller; the mirror itself is untouched.
    pub fn start(
        &mut self,
        feed: &dyn ChangeFeed,
        project_id: &str,
        sender: &Sender<FeedMessage>,
    ) -> Result<()> {
        self.stop();
        for entity in [EntityKind::Column, EntityKind::Task] {
            let topic = FeedTopic::new(project_id, entity);
            debug!(channel = %topic.channel(), "subscribing");
            match feed.subscribe(&topic, sender.clone()) {
                Ok(handle) => self.active.push(handle),
                Err(err) => {
                    self.stop();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Tear down every live subscription. Safe to call when idle.
    pub fn stop(&mut self) {
        self.active.clear();
    }

    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn topics(&self) -> Vec<FeedTopic> {
        self.active.iter().map(|sub| sub.topic().clone()).collect()
    }
}

/// In-process transport: events published here fan out immediately to every
/// matching live subscription. Used by tests, demos and single-process
/// setups where the "remote" store lives in the same process.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    inner: Arc<Mutex<MemoryFeedInner>>,
}

#[derive(Default)]
struct MemoryFeedInner {
    next_id: u64,
    routes: Vec<MemoryRoute>,
}

struct MemoryRoute {
    id: u64,
    topic: FeedTopic,
    sender: Sender<FeedMessage>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every live subscription matching the scope.
    pub fn publish(&self, project_id: &str, entity: EntityKind, event: ChangeEvent) {
        let inner = lock_inner(&self.inner);
        for route in &inner.routes {
            if route.topic.matches(project_id, entity) {
                let _ = route.sender.send(FeedMessage {
                    entity,
                    event: event.clone(),
                });
            }
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        lock_inner(&self.inner).routes.len()
    }
}

fn lock_inner(inner: &Mutex<MemoryFeedInner>) -> MutexGuard<'_, MemoryFeedInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ChangeFeed for MemoryFeed {
    fn subscribe(
        &self,
        topic: &FeedTopic,
        sender: Sender<FeedMessage>,
    ) -> Result<Box<dyn FeedSubscription>> {
        let mut inner = lock_inner(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.routes.push(MemoryRoute {
            id,
            topic: topic.clone(),
            sender,
        });
        Ok(Box::new(MemorySubscription {
            feed: Arc::clone(&self.inner),
            id,
            topic: topic.clone(),
        }))
    }
}

struct MemorySubscription {
    feed: Arc<Mutex<MemoryFeedInner>>,
    id: u64,
    topic: FeedTopic,
}

impl FeedSubscription for MemorySubscription {
    fn topic(&self) -> &FeedTopic {
        &self.topic
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        lock_inner(&self.feed)
            .routes
            .retain(|route| route.id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use std::sync::mpsc;

    struct FailingFeed;

    impl ChangeFeed for FailingFeed {
        fn subscribe(
            &self,
            topic: &FeedTopic,
            _sender: Sender<FeedMessage>,
        ) -> Result<Box<dyn FeedSubscription>> {
            Err(Error::Subscribe {
                channel: topic.channel(),
                reason: "transport offline".to_string(),
            })
        }
    }

    #[test]
    fn start_twice_keeps_a_single_subscription_set() {
        let feed = MemoryFeed::new();
        let mut subscriber = Subscriber::new();
        let (sender, _receiver) = mpsc::channel();

        subscriber.start(&feed, "prj-1", &sender).expect("start");
        assert_eq!(feed.active_subscriptions(), 2);

        subscriber.start(&feed, "prj-2", &sender).expect("restart");
        assert_eq!(feed.active_subscriptions(), 2);
        assert!(subscriber
            .topics()
            .iter()
            .all(|topic| topic.project_id == "prj-2"));
    }

    #[test]
    fn stop_tears_down_all_handles() {
        let feed = MemoryFeed::new();
        let mut subscriber = Subscriber::new();
        let (sender, _receiver) = mpsc::channel();

        subscriber.start(&feed, "prj-1", &sender).expect("start");
        subscriber.stop();

        assert!(!subscriber.is_active());
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[test]
    fn failed_subscribe_leaves_no_live_handles() {
        let mut subscriber = Subscriber::new();
        let (sender, _receiver) = mpsc::channel();

        let err = subscriber
            .start(&FailingFeed, "prj-1", &sender)
            .expect_err("subscribe fails");
        assert!(matches!(err, Error::Subscribe { .. }));
        assert!(!subscriber.is_active());
    }

    #[test]
    fn publish_routes_by_project_and_entity() {
        let feed = MemoryFeed::new();
        let (sender, receiver) = mpsc::channel();
        let _sub = feed
            .subscribe(&FeedTopic::new("prj-1", EntityKind::Task), sender)
            .expect("subscribe");

        feed.publish("prj-1", EntityKind::Task, ChangeEvent::insert(json!({"id": "t1"})));
        feed.publish("prj-2", EntityKind::Task, ChangeEvent::insert(json!({"id": "t2"})));
        feed.publish(
            "prj-1",
            EntityKind::Column,
            ChangeEvent::insert(json!({"id": "c1"})),
        );

        let message = receiver.try_recv().expect("one message");
        assert_eq!(message.event.record_id(), Some("t1"));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let feed = MemoryFeed::new();
        let (sender, _receiver) = mpsc::channel();
        let sub = feed
            .subscribe(&FeedTopic::new("prj-1", EntityKind::Task), sender)
            .expect("subscribe");
        assert_eq!(feed.active_subscriptions(), 1);
        drop(sub);
        assert_eq!(feed.active_subscriptions(), 0);
    }
}
