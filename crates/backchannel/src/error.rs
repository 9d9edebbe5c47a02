//! Error types for the correlation store.
//!
//! The taxonomy is deliberately small. Absent values (archive or item channel
//! missing on a non-creating lookup) are `Option`/`bool` returns, not errors;
//! only conditions a caller must branch on get a variant here. Every variant
//! is local and recoverable. Nothing in this crate aborts the process.

use thiserror::Error;

/// Errors surfaced by store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A write was attempted on a channel that has already been completed.
    ///
    /// Channels complete when their slot is removed or their archive is torn
    /// down; a racing writer sees this instead of a silent drop.
    #[error("channel is closed; the slot was removed or its archive torn down")]
    ChannelClosed,

    /// An inbound correlation tag is missing a field the operation needs.
    ///
    /// Callee-side accessors resolve ids exactly once from the transport
    /// attachment; when a field never arrived, the operation reports which one
    /// rather than guessing a default.
    #[error("missing correlation field `{field}` in inbound arguments")]
    MissingCorrelationId {
        /// The attachment field that was absent (`owner_id` or `request_id`).
        field: &'static str,
    },
}

impl Error {
    /// Shorthand used by tag-resolving accessors.
    pub(crate) fn missing(field: &'static str) -> Self {
        Self::MissingCorrelationId { field }
    }
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, Error>;
