//! Change notifications
//!
//! Views subscribe to a stack explicitly; there is no global broadcast.
//! Render refreshes go to a separate one-way sink keyed by owner.
//!
//! Edits only queue notices. They are delivered by [`Observers::deliver`]
//! once the stack is no longer borrowed, so callbacks and the refresh sink
//! can read the model they are told about.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::types::{ItemId, OwnerId};

/// Structural or data change inside a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    /// Data of rows `first_row..=last_row` under `parent` changed
    DataChanged {
        parent: ItemId,
        first_row: usize,
        last_row: usize,
    },
    /// A row was inserted under `parent`
    RowsInserted { parent: ItemId, row: usize },
    /// A row was removed from `parent`
    RowsRemoved { parent: ItemId, row: usize },
}

/// Receives "re-render this owner" requests
pub trait RefreshSink {
    fn refresh(&self, owner: OwnerId);
}

/// Sink that drops every request
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefresh;

impl RefreshSink for NoRefresh {
    fn refresh(&self, _owner: OwnerId) {}
}

/// Handle returned by [`Observers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Rc<RefCell<dyn FnMut(&StackEvent)>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notice {
    Event(StackEvent),
    Refresh,
}

/// Event subscribers plus the queue of undelivered notices
///
/// Shared between a stack and whoever flushes it; every method takes
/// `&self` and holds no borrow while a callback runs.
#[derive(Default)]
pub struct Observers {
    callbacks: RefCell<Vec<(SubscriptionId, Callback)>>,
    pending: RefCell<Vec<Notice>>,
    next_id: Cell<u64>,
    delivering: Cell<bool>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl FnMut(&StackEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let callback: Callback = Rc::new(RefCell::new(callback));
        self.callbacks.borrow_mut().push((id, callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.borrow_mut();
        let before = callbacks.len();
        callbacks.retain(|(sub, _)| *sub != id);
        callbacks.len() != before
    }

    /// Queue an event for the next delivery
    pub fn emit(&self, event: StackEvent) {
        self.pending.borrow_mut().push(Notice::Event(event));
    }

    /// Queue a render refresh. Repeated requests collapse into one.
    pub fn request_refresh(&self) {
        let mut pending = self.pending.borrow_mut();
        if !pending.contains(&Notice::Refresh) {
            pending.push(Notice::Refresh);
        }
    }

    /// Number of queued notices
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Deliver queued notices in order until the queue is empty.
    ///
    /// Notices queued by a callback are delivered in the same pass. A nested
    /// call made from inside a callback returns 0 and leaves the work to the
    /// outer pass.
    pub fn deliver(&self, refresh: &dyn RefreshSink, owner: OwnerId) -> usize {
        if self.delivering.replace(true) {
            return 0;
        }
        let mut delivered = 0;
        loop {
            let notices = std::mem::take(&mut *self.pending.borrow_mut());
            if notices.is_empty() {
                break;
            }
            for notice in notices {
                match notice {
                    Notice::Refresh => refresh.refresh(owner),
                    Notice::Event(event) => {
                        let callbacks: Vec<Callback> =
                            self.callbacks.borrow().iter().map(|(_, callback)| callback.clone()).collect();
                        for callback in callbacks {
                            if let Ok(mut callback) = callback.try_borrow_mut() {
                                (&mut *callback)(&event);
                            }
                        }
                    }
                }
                delivered += 1;
            }
        }
        self.delivering.set(false);
        delivered
    }

    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.len())
            .field("pending", &self.pending())
            .finish()
    }
}
