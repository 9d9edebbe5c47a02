//! Hand-built multicast primitives backing every observable surface in the
//! store.
//!
//! Two flavors share one observer contract:
//!
//! - [`ReplayChannel`]: a hot, latest-value channel. It owns at most one
//!   current value and replays it synchronously to each new subscriber before
//!   streaming later writes. Item slots and archive-level channels are built
//!   on this.
//! - [`PublishChannel`]: the same fan-out without the value cell. Only
//!   subscribers active at publish time observe an event. The per-archive
//!   aggregate change stream is built on this.
//!
//! # Design
//!
//! Observers are plain boxed closures invoked synchronously, in subscription
//! order, on whatever thread performs the write; nothing is buffered or
//! rescheduled. Internal locks cover cell and list state only; every
//! notification runs after the lock is released, so an observer may re-enter
//! the channel (or the wider store) freely. That re-entry is load-bearing:
//! the one-shot cleanup policy completes the very channel that is notifying
//! it.
//!
//! Delivery during a subscribe follows the contract "replay first, then join
//! the live set". A write racing that narrow gap from another thread may be
//! missed by the joining observer; single-threaded flows always observe exact
//! replay-then-stream ordering.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};

// ===========================================================================
// Observer contract
// ===========================================================================

/// Notification delivered to channel observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent<T> {
    /// A new current value.
    Next(T),
    /// The channel closed; no further events will arrive.
    Complete,
}

/// Observer callback. Receives every event exactly once, in subscription
/// order relative to other observers of the same channel.
pub type ObserverFn<T> = dyn Fn(&ChannelEvent<T>) + Send + Sync;

/// Identifier handed out by `subscribe`, used to detach a single observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Raw numeric id (diagnostics).
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Subscriber bookkeeping shared by both channel flavors. Lives inside each
/// channel's mutex; never performs delivery itself.
struct SubscriberSet<T> {
    entries: Vec<(SubscriberId, Arc<ObserverFn<T>>)>,
    closed: bool,
}

impl<T> SubscriberSet<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            closed: false,
        }
    }

    fn add(&mut self, id: SubscriberId, observer: Arc<ObserverFn<T>>) {
        self.entries.push((id, observer));
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Active observers in subscription order.
    fn snapshot(&self) -> Vec<Arc<ObserverFn<T>>> {
        self.entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    /// Close the set and hand back everyone who was subscribed.
    fn drain_closed(&mut self) -> Vec<Arc<ObserverFn<T>>> {
        self.closed = true;
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(_, observer)| observer)
            .collect()
    }
}

// ===========================================================================
// ReplayChannel
// ===========================================================================

/// Hot, latest-value multicast channel.
///
/// Holds at most one current value. New subscribers receive that value
/// synchronously before any later write; a channel that has never been
/// written delivers nothing until the first write. Completing the channel
/// notifies and detaches every subscriber, clears the value, and rejects
/// further writes with [`Error::ChannelClosed`].
pub struct ReplayChannel<T> {
    inner: Mutex<ReplayInner<T>>,
    next_id: AtomicU64,
}

struct ReplayInner<T> {
    value: Option<T>,
    subscribers: SubscriberSet<T>,
}

impl<T: Clone> ReplayChannel<T> {
    /// Empty open channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ReplayInner {
                value: None,
                subscribers: SubscriberSet::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open channel already holding `value`, as if it had been written once.
    /// Lets a creator hand out a channel that is never observably empty.
    #[must_use]
    pub fn with_value(value: T) -> Self {
        let channel = Self::new();
        channel.inner.lock().value = Some(value);
        channel
    }

    /// Replace the current value and notify every active subscriber, in
    /// subscription order.
    pub fn write(&self, value: T) -> Result<()> {
        let (event, targets) = {
            let mut inner = self.inner.lock();
            if inner.subscribers.closed {
                return Err(Error::ChannelClosed);
            }
            inner.value = Some(value.clone());
            (ChannelEvent::Next(value), inner.subscribers.snapshot())
        };
        for observer in targets {
            observer(&event);
        }
        Ok(())
    }

    /// Register an observer. Delivers the current value first, if one exists;
    /// on an already-completed channel delivers the completion notification
    /// immediately and registers nothing (the returned id is inert).
    pub fn subscribe<F>(&self, observer: F) -> SubscriberId
    where
        F: Fn(&ChannelEvent<T>) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let observer: Arc<ObserverFn<T>> = Arc::new(observer);

        let replay = {
            let inner = self.inner.lock();
            if inner.subscribers.closed {
                None
            } else {
                inner.value.clone()
            }
        };
        if let Some(value) = replay {
            observer(&ChannelEvent::Next(value));
        }

        // The channel may have completed while the replay ran.
        let completed = {
            let mut inner = self.inner.lock();
            if inner.subscribers.closed {
                true
            } else {
                inner.subscribers.add(id, observer.clone());
                false
            }
        };
        if completed {
            observer(&ChannelEvent::Complete);
        }
        id
    }

    /// Detach one observer. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.lock().subscribers.remove(id)
    }

    /// Close the channel: notify all subscribers of completion, detach them,
    /// and clear the current value. Idempotent. Returns how many subscribers
    /// were released.
    pub fn complete(&self) -> usize {
        let targets = {
            let mut inner = self.inner.lock();
            if inner.subscribers.closed {
                return 0;
            }
            inner.value = None;
            inner.subscribers.drain_closed()
        };
        let event = ChannelEvent::Complete;
        for observer in &targets {
            observer(&event);
        }
        targets.len()
    }

    /// Current value, if any. Completed channels report `None`.
    #[must_use]
    pub fn current(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }

    /// Whether the channel holds a value right now.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.inner.lock().value.is_some()
    }

    /// Whether `complete` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().subscribers.closed
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.entries.len()
    }
}

impl<T: Clone> Default for ReplayChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ReplayChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ReplayChannel")
            .field("has_value", &inner.value.is_some())
            .field("subscribers", &inner.subscribers.entries.len())
            .field("closed", &inner.subscribers.closed)
            .finish()
    }
}

// ===========================================================================
// PublishChannel
// ===========================================================================

/// Multicast channel without replay: only observers subscribed at publish
/// time see an event. Used for side-channel broadcasts where history must not
/// leak to late subscribers.
pub struct PublishChannel<T> {
    subscribers: Mutex<SubscriberSet<T>>,
    next_id: AtomicU64,
}

impl<T: Clone> PublishChannel<T> {
    /// Open channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(SubscriberSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver `value` to every active subscriber, in subscription order.
    /// Returns `false` (and drops the value) when the channel has completed.
    pub fn publish(&self, value: T) -> bool {
        let targets = {
            let subscribers = self.subscribers.lock();
            if subscribers.closed {
                return false;
            }
            subscribers.snapshot()
        };
        let event = ChannelEvent::Next(value);
        for observer in targets {
            observer(&event);
        }
        true
    }

    /// Register an observer for future events. No replay ever happens here;
    /// on a completed channel the completion notification is delivered
    /// immediately and nothing registers.
    pub fn subscribe<F>(&self, observer: F) -> SubscriberId
    where
        F: Fn(&ChannelEvent<T>) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let observer: Arc<ObserverFn<T>> = Arc::new(observer);
        let completed = {
            let mut subscribers = self.subscribers.lock();
            if subscribers.closed {
                true
            } else {
                subscribers.add(id, observer.clone());
                false
            }
        };
        if completed {
            observer(&ChannelEvent::Complete);
        }
        id
    }

    /// Detach one observer. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().remove(id)
    }

    /// Close the channel, notifying and detaching all subscribers. Idempotent.
    /// Returns how many subscribers were released.
    pub fn complete(&self) -> usize {
        let targets = {
            let mut subscribers = self.subscribers.lock();
            if subscribers.closed {
                return 0;
            }
            subscribers.drain_closed()
        };
        let event = ChannelEvent::Complete;
        for observer in &targets {
            observer(&event);
        }
        targets.len()
    }

    /// Whether `complete` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.subscribers.lock().closed
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().entries.len()
    }
}

impl<T: Clone> Default for PublishChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PublishChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.subscribers.lock();
        f.debug_struct("PublishChannel")
            .field("subscribers", &subscribers.entries.len())
            .field("closed", &subscribers.closed)
            .finish()
    }
}
