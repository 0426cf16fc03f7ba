//! Fan-out notification bus for applied board changes.
//!
//! Every applied store mutation produces exactly one typed notice,
//! delivered synchronously to listeners in registration order. There is no
//! batching or coalescing; consumers that need less can debounce on their
//! side.

use serde::Serialize;

use crate::event::ChangeEvent;

/// What happened to the record, from the mirror's point of view.
///
/// DELETE events and "UPDATE with the soft-delete flag set" both project as
/// removal but stay distinct operation kinds; their wire shapes differ and
/// consumers may care which one occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    SoftDelete,
}

/// Notification payload handed to listeners.
///
/// Removal notices keep the last known full snapshot in `removed`, so a
/// consumer bound to the record (a detail view, say) still has complete
/// data after the record has left the store. `event` is the wire payload
/// as delivered, which may be partial.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeNotice<T> {
    pub op: ChangeOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<T>,
    pub event: ChangeEvent,
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener<T> = Box<dyn FnMut(&ChangeNotice<T>)>;

/// Synchronous in-process publish/subscribe, one bus per entity kind.
pub struct ChangeBus<T> {
    listeners: Vec<(ListenerId, Listener<T>)>,
    next_id: u64,
}

impl<T> Default for ChangeBus<T> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> ChangeBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&ChangeNotice<T>) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Deliver to every listener, in registration order.
    pub fn emit(&mut self, notice: &ChangeNotice<T>) {
        for (_, listener) in &mut self.listeners {
            listener(notice);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeEvent;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn notice(op: ChangeOp) -> ChangeNotice<u32> {
        ChangeNotice {
            op,
            record: None,
            removed: None,
            event: ChangeEvent::insert(serde_json::json!({"id": "x"})),
        }
    }

    #[test]
    fn delivers_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus: ChangeBus<u32> = ChangeBus::new();

        let first = Rc::clone(&seen);
        bus.subscribe(move |_| first.borrow_mut().push("first"));
        let second = Rc::clone(&seen);
        bus.subscribe(move |_| second.borrow_mut().push("second"));

        bus.emit(&notice(ChangeOp::Insert));
        assert_eq!(*seen.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let count = Rc::new(RefCell::new(0));
        let mut bus: ChangeBus<u32> = ChangeBus::new();

        let counter = Rc::clone(&count);
        let id = bus.subscribe(move |_| *counter.borrow_mut() += 1);
        bus.emit(&notice(ChangeOp::Update));

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&notice(ChangeOp::Update));

        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn emit_reaches_every_listener_once() {
        let count = Rc::new(RefCell::new(0));
        let mut bus: ChangeBus<u32> = ChangeBus::new();
        for _ in 0..3 {
            let counter = Rc::clone(&count);
            bus.subscribe(move |_| *counter.borrow_mut() += 1);
        }

        bus.emit(&notice(ChangeOp::Delete));
        assert_eq!(*count.borrow(), 3);
    }
}
