//! Correlation pair: the short-lived facade one exchange is driven through.
//!
//! A pair is built over two archives (the caller's and the callee's) for a
//! single request id. It bundles the three things an exchanging component
//! needs: the caller-facing read stream (Unknown-filtered, optionally
//! self-cleaning), the callee-facing write handle, and an explicit remover
//! for abandoning the exchange early.
//!
//! The pair owns nothing. It holds shared handles into channels owned by the
//! archives, so dropping a pair has no effect on the exchange; only the
//! remover (or the auto-removal policy) frees the caller's slot.
//!
//! # One-shot cleanup
//!
//! By default the first non-Unknown value surfaced to a caller subscriber
//! removes the caller's item channel immediately after the subscriber runs,
//! so a completed one-shot exchange never lingers. States listed in
//! [`PairOptions::exclude_from_auto_remove`] are exempt: they surface without
//! freeing the slot, so a later terminal state can still arrive.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::archive::{Archive, ItemChannel};
use crate::channel::{ChannelEvent, SubscriberId};
use crate::error::Result;
use crate::item::{Item, Payload, State};
use crate::registry::ArchiveRegistry;

/// Policy knobs for one exchange.
///
/// Exclusion matching compares the whole state value (code and message),
/// exactly like the Unknown-sentinel comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PairOptions {
    /// Placeholder written to the caller's slot on establish; `None` skips
    /// the write and merely reserves the slot.
    pub init_caller_state: Option<State>,
    /// Placeholder written to the callee's slot on establish.
    pub init_callee_state: Option<State>,
    /// Whether the first surfaced value frees the caller's slot.
    pub auto_remove: bool,
    /// States that surface without triggering auto-removal.
    pub exclude_from_auto_remove: Vec<State>,
}

impl Default for PairOptions {
    fn default() -> Self {
        Self {
            init_caller_state: Some(State::UNKNOWN),
            init_callee_state: Some(State::UNKNOWN),
            auto_remove: true,
            exclude_from_auto_remove: Vec::new(),
        }
    }
}

/// Caller-side facade for one exchange between two archives.
pub struct ExchangePair {
    request_id: String,
    caller: Arc<Archive>,
    callee: Arc<Archive>,
    caller_channel: Arc<ItemChannel>,
    callee_channel: Arc<ItemChannel>,
    options: PairOptions,
}

impl ExchangePair {
    /// Build the pair: resolve (or create) both archives, optionally arm both
    /// slots with their placeholder states through the registry save path,
    /// and capture the two slot channels.
    pub fn establish(
        registry: &ArchiveRegistry,
        request_id: &str,
        caller_id: &str,
        callee_id: &str,
        options: PairOptions,
    ) -> Result<Self> {
        if let Some(state) = options.init_caller_state.clone() {
            registry.save_item(caller_id, request_id, state, None)?;
        }
        if let Some(state) = options.init_callee_state.clone() {
            registry.save_item(callee_id, request_id, state, None)?;
        }
        let caller = Arc::clone(registry.get_or_create_archive(caller_id).archive());
        let callee = Arc::clone(registry.get_or_create_archive(callee_id).archive());
        let caller_channel = caller.get_or_create_item_channel(request_id);
        let callee_channel = callee.get_or_create_item_channel(request_id);
        debug!(caller_id, callee_id, request_id, "exchange pair established");
        Ok(Self {
            request_id: request_id.to_string(),
            caller,
            callee,
            caller_channel,
            callee_channel,
            options,
        })
    }

    /// Subscribe to the caller-facing result stream.
    ///
    /// Unknown-state items never surface (the placeholder is not a result).
    /// Under the default policy the observer runs once and the slot is freed
    /// right after it returns; excluded states surface without freeing.
    pub fn subscribe_caller<F>(&self, observer: F) -> SubscriberId
    where
        F: Fn(&Item) + Send + Sync + 'static,
    {
        let archive = Arc::clone(&self.caller);
        let request_id = self.request_id.clone();
        let auto_remove = self.options.auto_remove;
        let excluded = self.options.exclude_from_auto_remove.clone();
        self.caller_channel.subscribe(move |event| {
            let ChannelEvent::Next(item) = event else {
                return;
            };
            if item.is_unknown() {
                return;
            }
            observer(item);
            if auto_remove && !excluded.contains(&item.state) {
                trace!(
                    request_id,
                    state_code = item.state.code,
                    "one-shot exchange done, caller slot removed"
                );
                archive.remove_item_channel(&request_id);
            }
        })
    }

    /// Write into the callee's slot (caller → callee direction), through
    /// `set_item` so the callee archive's aggregate stream observes it.
    pub fn write_callee(&self, state: State, payload: Option<Payload>) -> Result<Item> {
        self.callee.set_item(&self.request_id, state, payload)
    }

    /// Free the caller's slot regardless of policy: the escape hatch for
    /// abandoning an exchange that never produced a result. Returns whether
    /// a slot existed.
    pub fn remove_caller_item(&self) -> bool {
        let removed = self.caller.remove_item_channel(&self.request_id);
        if removed {
            debug!(request_id = self.request_id.as_str(), "exchange abandoned");
        }
        removed
    }

    /// Request id this pair exchanges under.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Raw caller-side slot channel (unfiltered).
    #[must_use]
    pub fn caller_channel(&self) -> &Arc<ItemChannel> {
        &self.caller_channel
    }

    /// Raw callee-side slot channel, for a callee living in the same scope.
    #[must_use]
    pub fn callee_channel(&self) -> &Arc<ItemChannel> {
        &self.callee_channel
    }

    /// Policy this pair was built with.
    #[must_use]
    pub fn options(&self) -> &PairOptions {
        &self.options
    }
}

impl fmt::Debug for ExchangePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangePair")
            .field("request_id", &self.request_id)
            .field("auto_remove", &self.options.auto_remove)
            .finish()
    }
}
