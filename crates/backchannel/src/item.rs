//! Value cells exchanged between components.
//!
//! An [`Item`] is the unit of exchange: a [`State`] tag plus an optional
//! opaque [`Payload`]. Items are replaced wholesale on every write; there is
//! no partial update anywhere in the store. The store interprets exactly one
//! state, the [`State::UNKNOWN`] sentinel ("no result yet / reset"); every
//! other code belongs to the exchanging components.
//!
//! Payloads are deliberately untyped at the store level. Instead of a generic
//! cell cast at the call site, [`Payload`] boxes the value together with a
//! runtime type tag and checks the tag on every read, so a mistyped read
//! yields `None` instead of undefined behavior or a panic.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ===========================================================================
// State
// ===========================================================================

/// Outcome tag carried by every [`Item`].
///
/// Equality is structural over both fields: `State::new(-1)` is the Unknown
/// sentinel, but `State::with_message(-1, "reset")` is not. Components agree
/// on codes out of band; the store only ever compares against
/// [`State::UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct State {
    /// Numeric outcome code. `-1` is reserved for the Unknown sentinel.
    pub code: i32,
    /// Optional human-readable annotation.
    pub message: Option<String>,
}

impl State {
    /// Sentinel meaning "no result yet / reset". The only state the store
    /// itself interprets.
    pub const UNKNOWN: Self = Self {
        code: -1,
        message: None,
    };

    /// Conventional success code. Not interpreted by the store.
    pub const OK: Self = Self {
        code: 0,
        message: None,
    };

    /// Conventional failure code. Not interpreted by the store.
    pub const FAILED: Self = Self {
        code: 1,
        message: None,
    };

    /// Conventional cancellation code. Not interpreted by the store.
    pub const CANCELED: Self = Self {
        code: 2,
        message: None,
    };

    /// State with the given code and no message.
    #[must_use]
    pub fn new(code: i32) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// State with the given code and message.
    #[must_use]
    pub fn with_message(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Whether this is exactly the Unknown sentinel.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl Default for State {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{} ({msg})", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

// ===========================================================================
// Payload
// ===========================================================================

/// Opaque exchange payload with a runtime type tag.
///
/// The stored value is shared (`Arc`), so cloning a payload or an item never
/// copies component data. Reads go through [`Payload::downcast_ref`], which
/// checks the concrete type and returns `None` on mismatch.
///
/// Equality is identity: two payloads are equal when they share the same
/// allocation. Clones of one item therefore compare equal, but two payloads
/// built from identical values do not. The store treats payload content as
/// opaque and never inspects it.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    /// Box `value` together with its type tag.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Checked read: `Some(&T)` when the stored value is a `T`, else `None`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.value).downcast_ref::<T>()
    }

    /// Whether the stored value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        (*self.value).is::<T>()
    }

    /// Type name recorded when the payload was created. Diagnostic only; the
    /// authoritative check is [`Payload::downcast_ref`].
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload<{}>", self.type_name)
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

// ===========================================================================
// Item
// ===========================================================================

/// One exchanged value: state tag plus optional payload.
///
/// Every write constructs a fresh item from the full `(state, payload)` pair;
/// nothing merges with or mutates a previously stored item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item {
    /// Outcome tag.
    pub state: State,
    /// Opaque component data, if any.
    pub payload: Option<Payload>,
}

impl Item {
    /// Item from a state and an already-boxed payload.
    #[must_use]
    pub fn new(state: State, payload: Option<Payload>) -> Self {
        Self { state, payload }
    }

    /// The reset placeholder: Unknown state, no payload.
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Item carrying `value` as its payload.
    #[must_use]
    pub fn with_value<T: Any + Send + Sync>(state: State, value: T) -> Self {
        Self {
            state,
            payload: Some(Payload::new(value)),
        }
    }

    /// Whether the state is exactly the Unknown sentinel.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.state.is_unknown()
    }

    /// Checked payload read; `None` when there is no payload or it holds a
    /// different type.
    #[must_use]
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(Payload::downcast_ref)
    }
}
