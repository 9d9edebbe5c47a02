//! backchannel: in-process correlation store for request/response exchange
//! between decoupled UI components.
//!
//! A caller that wants work done by a component it holds no reference to
//! writes a request into the callee's archive slot and watches its own slot
//! for the result. Every slot is a latest-value channel keyed by request id,
//! every archive is keyed by owner id, and one registry ties the process
//! together.
//!
//! # Architecture
//!
//! ```text
//! Caller ── establish ──► ArchiveRegistry ──► Archive (per owner id)
//!    │                         │                  │
//!    │                    ArchiveChannel      ItemChannel (per request id)
//!    │                    (latest archive)    (latest item, replay of one)
//!    │                                            │
//!    └──── subscribe_caller ◄── ExchangePair ◄────┘
//!                                    │
//!                               write_callee ──► callee Archive
//! ```
//!
//! # Modules
//!
//! - `item`: exchanged values (`State`, `Payload`, `Item`) and the Unknown
//!   sentinel
//! - `channel`: latest-value multicast primitives (`ReplayChannel`,
//!   `PublishChannel`)
//! - `archive`: per-owner map of item channels plus an aggregate change feed
//! - `registry`: owner-keyed archive map, the single mutual-exclusion domain
//! - `pair`: per-exchange facade with Unknown filtering and auto-removal
//! - `transport`: correlation ids carried inside loosely typed argument maps
//! - `error`: error and result types
//!
//! # Delivery model
//!
//! All notification is synchronous: a write returns only after every
//! subscriber registered at write time has run, in subscription order, on the
//! writing thread. Nothing here spawns, schedules, or retries.
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod archive;
pub mod channel;
pub mod error;
pub mod item;
pub mod pair;
pub mod registry;
pub mod transport;

pub use archive::{Archive, ItemChange, ItemChannel};
pub use channel::{ChannelEvent, PublishChannel, ReplayChannel, SubscriberId};
pub use error::{Error, Result};
pub use item::{Item, Payload, State};
pub use pair::{ExchangePair, PairOptions};
pub use registry::{ArchiveChannel, ArchiveHandle, ArchiveRegistry};
pub use transport::{ArgMap, CorrelationTag};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
