//! Owner-scoped collection of item slots.
//!
//! An [`Archive`] maps request ids to item channels and carries one aggregate
//! change stream that re-emits every `(request_id, Item)` written through
//! [`Archive::set_item`]. Per-slot channels replay their latest value; the
//! aggregate stream never replays. It exists so a component can watch "did
//! anything in this archive change" without holding one subscription per
//! slot.
//!
//! A request id maps to at most one live channel. Removing a slot completes
//! its channel, after which the id is free to be recreated fresh (empty, no
//! history). The archive's own map lock is never held while observers run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::channel::{PublishChannel, ReplayChannel, SubscriberId};
use crate::error::{Error, Result};
use crate::item::{Item, Payload, State};

/// Latest-value channel carrying one slot's [`Item`].
pub type ItemChannel = ReplayChannel<Item>;

/// One event on an archive's aggregate change stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemChange {
    /// Slot that changed.
    pub request_id: String,
    /// The item exactly as written.
    pub item: Item,
}

/// Owner-scoped store of item channels keyed by request id.
pub struct Archive {
    items: Mutex<HashMap<String, Arc<ItemChannel>>>,
    changes: PublishChannel<ItemChange>,
}

impl Archive {
    /// Empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            changes: PublishChannel::new(),
        }
    }

    // -- Slot access --------------------------------------------------------

    /// Channel for `request_id`, creating an empty one if the slot is free.
    /// Idempotent: a live slot always yields the same channel.
    pub fn get_or_create_item_channel(&self, request_id: &str) -> Arc<ItemChannel> {
        let mut items = self.items.lock();
        if let Some(channel) = items.get(request_id) {
            return Arc::clone(channel);
        }
        trace!(request_id, "item channel created");
        let channel = Arc::new(ItemChannel::new());
        items.insert(request_id.to_string(), Arc::clone(&channel));
        channel
    }

    /// Non-creating lookup. Absent slot is `None`, never an error.
    #[must_use]
    pub fn item_channel(&self, request_id: &str) -> Option<Arc<ItemChannel>> {
        self.items.lock().get(request_id).map(Arc::clone)
    }

    /// Whether a channel exists for `request_id` (populated or not).
    #[must_use]
    pub fn has_item_channel(&self, request_id: &str) -> bool {
        self.items.lock().contains_key(request_id)
    }

    /// Whether a channel exists **and** holds a current value. Distinguishes
    /// "slot reserved" from "slot populated".
    #[must_use]
    pub fn has_item(&self, request_id: &str) -> bool {
        self.item_channel(request_id)
            .is_some_and(|channel| channel.has_value())
    }

    /// The single "no real result yet" predicate: true when the slot is
    /// absent, empty, or holds an Unknown-state item.
    #[must_use]
    pub fn is_item_unknown_or_absent(&self, request_id: &str) -> bool {
        match self.item_channel(request_id).and_then(|ch| ch.current()) {
            Some(item) => item.is_unknown(),
            None => true,
        }
    }

    /// Current item in the slot, if populated. Pure peek.
    #[must_use]
    pub fn find_item(&self, request_id: &str) -> Option<Item> {
        self.item_channel(request_id).and_then(|ch| ch.current())
    }

    /// Read and free in one step: returns the current item and removes the
    /// slot when (and only when) one was populated. An empty reserved slot is
    /// left in place.
    pub fn take_item(&self, request_id: &str) -> Option<Item> {
        let (channel, item) = {
            let mut items = self.items.lock();
            let channel = items.get(request_id)?;
            let item = channel.current()?;
            let channel = items.remove(request_id)?;
            (channel, item)
        };
        trace!(request_id, "item taken, slot removed");
        channel.complete();
        Some(item)
    }

    // -- Mutation -------------------------------------------------------------

    /// Compose and store a fresh item, then publish the `(request_id, item)`
    /// pair on the aggregate change stream. The only mutation path used for
    /// cross-component exchange; writing a slot channel directly bypasses the
    /// aggregate stream.
    ///
    /// Fails with [`Error::ChannelClosed`] if this archive has been torn down
    /// or the slot's channel was completed out from under the write.
    pub fn set_item(
        &self,
        request_id: &str,
        state: State,
        payload: Option<Payload>,
    ) -> Result<Item> {
        if self.changes.is_closed() {
            return Err(Error::ChannelClosed);
        }
        let channel = self.get_or_create_item_channel(request_id);
        let item = Item::new(state, payload);
        channel.write(item.clone())?;
        trace!(
            request_id,
            state_code = item.state.code,
            has_payload = item.payload.is_some(),
            "item written"
        );
        self.changes.publish(ItemChange {
            request_id: request_id.to_string(),
            item: item.clone(),
        });
        Ok(item)
    }

    /// Complete and detach the slot's channel. Returns whether one existed;
    /// afterwards the request id may be recreated fresh.
    pub fn remove_item_channel(&self, request_id: &str) -> bool {
        let removed = self.items.lock().remove(request_id);
        match removed {
            Some(channel) => {
                let released = channel.complete();
                trace!(request_id, released, "item channel removed");
                true
            }
            None => false,
        }
    }

    /// Complete every channel and empty the map. The archive itself stays
    /// usable; registry-driven removal additionally closes the change stream.
    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut items = self.items.lock();
            items.drain().collect()
        };
        let slots = drained.len();
        let mut released = 0;
        for (_, channel) in drained {
            released += channel.complete();
        }
        debug!(slots, released, "archive cleared");
    }

    /// Tear the archive down for good: clear all slots and close the
    /// aggregate stream so its subscribers are released. Further `set_item`
    /// calls fail with [`Error::ChannelClosed`].
    pub(crate) fn shutdown(&self) {
        self.clear();
        self.changes.complete();
    }

    // -- Aggregate change stream ------------------------------------------------

    /// The aggregate change stream. Subscribers see every future
    /// [`set_item`](Archive::set_item) as one event; there is no replay.
    #[must_use]
    pub fn changes(&self) -> &PublishChannel<ItemChange> {
        &self.changes
    }

    /// Convenience for the common case: observe every change as a
    /// `(request_id, item)` pair, ignoring the completion notification.
    pub fn subscribe_changes<F>(&self, observer: F) -> SubscriberId
    where
        F: Fn(&ItemChange) + Send + Sync + 'static,
    {
        self.changes.subscribe(move |event| {
            if let crate::channel::ChannelEvent::Next(change) = event {
                observer(change);
            }
        })
    }

    // -- Introspection ------------------------------------------------------------

    /// Number of live slots (reserved or populated).
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether no slots exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("slots", &self.len())
            .field("changes", &self.changes)
            .finish()
    }
}
