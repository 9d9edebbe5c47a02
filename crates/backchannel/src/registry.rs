//! Process-scoped registry of archives, keyed by owner id.
//!
//! The registry is an explicit, constructed object: the host lifecycle
//! container creates one per scope, hands shared handles to the components
//! in that scope, and tears it down (or simply drops it) when the scope dies.
//! There is no global instance.
//!
//! Every entry pairs the [`Archive`] with a latest-value channel that
//! re-publishes the archive on each save, so a component holding only the
//! archive-level subscription still learns that *some* item changed.
//! [`ArchiveRegistry::get_or_create_archive`] returns both together in one
//! [`ArchiveHandle`], so creation and first access are a single atomic step,
//! never a create-then-lookup pair an interleaving remove could split.
//!
//! One mutex over the owner map serializes all registry operations, which is
//! what rules out duplicate archives for an owner and create/remove races.
//! Observer callbacks always run after that lock is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::archive::{Archive, ItemChannel};
use crate::channel::ReplayChannel;
use crate::error::Result;
use crate::item::{Item, Payload, State};
use crate::transport::CorrelationTag;

/// Latest-value channel carrying an owner's [`Archive`].
pub type ArchiveChannel = ReplayChannel<Arc<Archive>>;

/// An archive together with its latest-value channel.
///
/// Cloning is cheap (two reference counts); all clones address the same
/// archive entry.
#[derive(Debug, Clone)]
pub struct ArchiveHandle {
    archive: Arc<Archive>,
    channel: Arc<ArchiveChannel>,
}

impl ArchiveHandle {
    /// The archive itself.
    #[must_use]
    pub fn archive(&self) -> &Arc<Archive> {
        &self.archive
    }

    /// The archive-level channel: replays the current archive to new
    /// subscribers and re-emits it on every registry save for this owner.
    #[must_use]
    pub fn channel(&self) -> &Arc<ArchiveChannel> {
        &self.channel
    }
}

/// Registry of archives, one per owner id, under a single critical section.
pub struct ArchiveRegistry {
    archives: Mutex<HashMap<String, ArchiveHandle>>,
}

impl ArchiveRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            archives: Mutex::new(HashMap::new()),
        }
    }

    // -- Archive lifecycle ----------------------------------------------------

    /// Handle for `owner_id`, creating the archive if the owner has none.
    /// Idempotent; the handle's channel already holds the archive, so the
    /// returned entry is never observably empty.
    pub fn get_or_create_archive(&self, owner_id: &str) -> ArchiveHandle {
        let mut archives = self.archives.lock();
        if let Some(handle) = archives.get(owner_id) {
            return handle.clone();
        }
        debug!(owner_id, "archive created");
        let archive = Arc::new(Archive::new());
        let handle = ArchiveHandle {
            channel: Arc::new(ArchiveChannel::with_value(Arc::clone(&archive))),
            archive,
        };
        archives.insert(owner_id.to_string(), handle.clone());
        handle
    }

    /// Non-creating lookup. Absent owner is `None`, never an error.
    #[must_use]
    pub fn archive(&self, owner_id: &str) -> Option<ArchiveHandle> {
        self.archives.lock().get(owner_id).cloned()
    }

    /// Whether an archive exists for `owner_id`.
    #[must_use]
    pub fn has_archive(&self, owner_id: &str) -> bool {
        self.archives.lock().contains_key(owner_id)
    }

    /// Remove the owner's archive: clear its slots, close its change stream,
    /// complete its archive-level channel, and free the owner id. Returns
    /// whether an archive existed.
    pub fn remove_archive(&self, owner_id: &str) -> bool {
        let removed = self.archives.lock().remove(owner_id);
        match removed {
            Some(handle) => {
                handle.archive.shutdown();
                handle.channel.complete();
                debug!(owner_id, "archive removed");
                true
            }
            None => false,
        }
    }

    // -- Save path ---------------------------------------------------------------

    /// The single write entry point used for cross-component exchange:
    /// resolve (or create) the owner's archive, store the item via
    /// [`Archive::set_item`], then re-publish the archive on its own channel.
    ///
    /// Fails with [`ChannelClosed`](crate::Error::ChannelClosed) only when a
    /// concurrent remove tears the archive down mid-save.
    pub fn save_item(
        &self,
        owner_id: &str,
        request_id: &str,
        state: State,
        payload: Option<Payload>,
    ) -> Result<Item> {
        let handle = self.get_or_create_archive(owner_id);
        let item = handle.archive.set_item(request_id, state, payload)?;
        handle.channel.write(Arc::clone(&handle.archive))?;
        trace!(
            owner_id,
            request_id,
            state_code = item.state.code,
            "item saved"
        );
        Ok(item)
    }

    /// Registry-path write of the Unknown placeholder: the idempotent reset
    /// used to (re-)arm an exchange.
    pub fn reset_item(&self, owner_id: &str, request_id: &str) -> Result<Item> {
        self.save_item(owner_id, request_id, State::UNKNOWN, None)
    }

    // -- Tag-driven accessors (callee side) -----------------------------------------

    /// Save against the archive slot named by an inbound tag. The tag's ids
    /// are resolved exactly once; an incomplete tag reports which field is
    /// missing and mutates nothing.
    pub fn save_item_for(
        &self,
        tag: &CorrelationTag,
        state: State,
        payload: Option<Payload>,
    ) -> Result<Item> {
        let (owner_id, request_id) = tag.require_ids()?;
        self.save_item(owner_id, request_id, state, payload)
    }

    /// Reset the slot named by an inbound tag to the Unknown placeholder.
    pub fn reset_item_for(&self, tag: &CorrelationTag) -> Result<Item> {
        let (owner_id, request_id) = tag.require_ids()?;
        self.reset_item(owner_id, request_id)
    }

    /// Remove the slot named by an inbound tag. `Ok(false)` when the owner or
    /// slot is absent; an incomplete tag is an error.
    pub fn remove_item_for(&self, tag: &CorrelationTag) -> Result<bool> {
        let (owner_id, request_id) = tag.require_ids()?;
        Ok(self
            .archive(owner_id)
            .is_some_and(|handle| handle.archive.remove_item_channel(request_id)))
    }

    /// Whether the slot named by the tag is populated. Incomplete tags and
    /// absent owners are simply `false`; predicates never fail.
    #[must_use]
    pub fn has_item_for(&self, tag: &CorrelationTag) -> bool {
        let Ok((owner_id, request_id)) = tag.require_ids() else {
            return false;
        };
        self.archive(owner_id)
            .is_some_and(|handle| handle.archive.has_item(request_id))
    }

    /// Channel for the slot named by an inbound tag, creating archive and
    /// slot as needed (a callee subscribes to its request slot before the
    /// first write arrives).
    pub fn item_channel_for(&self, tag: &CorrelationTag) -> Result<Arc<ItemChannel>> {
        let (owner_id, request_id) = tag.require_ids()?;
        let handle = self.get_or_create_archive(owner_id);
        Ok(handle.archive.get_or_create_item_channel(request_id))
    }

    // -- Teardown -----------------------------------------------------------------

    /// Release everything: every archive is cleared and closed, every
    /// archive-level channel completed, the owner map emptied. Idempotent;
    /// also runs on drop so a host that just drops its registry still
    /// releases all subscribers deterministically.
    pub fn shutdown(&self) {
        let drained: Vec<(String, ArchiveHandle)> = {
            let mut archives = self.archives.lock();
            archives.drain().collect()
        };
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        for (owner_id, handle) in drained {
            handle.archive.shutdown();
            handle.channel.complete();
            trace!(owner_id, "archive torn down");
        }
        debug!(archives = count, "registry shut down");
    }

    // -- Introspection ----------------------------------------------------------------

    /// Number of live archives.
    #[must_use]
    pub fn archive_count(&self) -> usize {
        self.archives.lock().len()
    }

    /// Owner ids with a live archive, sorted for determinism.
    #[must_use]
    pub fn owner_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.archives.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ArchiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ArchiveRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ArchiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveRegistry")
            .field("archives", &self.archive_count())
            .finish()
    }
}
