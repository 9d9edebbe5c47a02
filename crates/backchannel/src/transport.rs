//! Transport boundary: correlation ids and their attachment to argument maps.
//!
//! The store never talks to a navigation framework. What crosses the boundary
//! is three string fields (`owner_id`, `request_id`, `unique_id`) carried
//! inside one reserved, nested object of whatever key/value argument map the
//! host framework passes to a component. This module owns that shape:
//! attaching a [`CorrelationTag`] to an outgoing argument map, extracting one
//! from inbound arguments, and generating the ids themselves.
//!
//! Ids are resolved from arguments exactly once, into a tag value that is
//! then passed around explicitly. Nothing downstream re-reads the transport
//! or recomputes a default id per call; [`CorrelationTag::require_ids`] is
//! the single checkpoint that either yields both mandatory ids or names the
//! missing one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Reserved key of the nested attachment object inside an argument map.
pub const ATTACHMENT_KEY: &str = "backchannel";
/// Field naming the caller's archive (the data owner).
pub const OWNER_ID_KEY: &str = "owner_id";
/// Field naming the item slot within the owner's archive.
pub const REQUEST_ID_KEY: &str = "request_id";
/// Field carrying the callee's own stable identity.
pub const UNIQUE_ID_KEY: &str = "unique_id";

/// Argument-map shape hosts pass to components.
pub type ArgMap = Map<String, Value>;

/// Fresh random correlation id (UUID v4, hyphenated).
#[must_use]
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}

/// The three transport-carried correlation fields, each optional.
///
/// A tag is a resolved value: once extracted, it no longer depends on the
/// argument map it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CorrelationTag {
    /// Archive key of the data owner (the caller).
    pub owner_id: Option<String>,
    /// Item key within the owner's archive (one exchange).
    pub request_id: Option<String>,
    /// The receiving component's own stable identity.
    pub unique_id: Option<String>,
}

impl CorrelationTag {
    /// Tag for an outgoing request: the caller names itself as owner.
    #[must_use]
    pub fn for_request(owner_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            request_id: Some(request_id.into()),
            unique_id: None,
        }
    }

    /// Same tag with the unique-identity field set.
    #[must_use]
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Both mandatory ids, or the name of the first missing field.
    /// The single resolve-once checkpoint for every id-dependent operation.
    pub fn require_ids(&self) -> Result<(&str, &str)> {
        let owner_id = self
            .owner_id
            .as_deref()
            .ok_or(Error::missing(OWNER_ID_KEY))?;
        let request_id = self
            .request_id
            .as_deref()
            .ok_or(Error::missing(REQUEST_ID_KEY))?;
        Ok((owner_id, request_id))
    }

    /// Whether both mandatory ids are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.owner_id.is_some() && self.request_id.is_some()
    }

    /// Write this tag's present fields into the reserved nested object of
    /// `args`, creating the object if needed. Absent fields leave any
    /// previously attached value alone.
    pub fn attach(&self, args: &mut ArgMap) {
        let attachment = args
            .entry(ATTACHMENT_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !attachment.is_object() {
            // A foreign value under our key is replaced wholesale.
            *attachment = Value::Object(Map::new());
        }
        if let Some(fields) = attachment.as_object_mut() {
            for (key, value) in [
                (OWNER_ID_KEY, &self.owner_id),
                (REQUEST_ID_KEY, &self.request_id),
                (UNIQUE_ID_KEY, &self.unique_id),
            ] {
                if let Some(value) = value {
                    fields.insert(key.to_string(), Value::String(value.clone()));
                }
            }
        }
    }

    /// Read whatever correlation fields are attached to `args`. Missing
    /// attachment, missing fields, or non-string values all resolve to
    /// `None`; extraction never fails.
    #[must_use]
    pub fn extract(args: &ArgMap) -> Self {
        let fields = args.get(ATTACHMENT_KEY).and_then(Value::as_object);
        let read = |key: &str| {
            fields
                .and_then(|f| f.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            owner_id: read(OWNER_ID_KEY),
            request_id: read(REQUEST_ID_KEY),
            unique_id: read(UNIQUE_ID_KEY),
        }
    }
}

/// The attached unique id, if any.
#[must_use]
pub fn unique_id(args: &ArgMap) -> Option<String> {
    CorrelationTag::extract(args).unique_id
}

/// Stable, create-if-absent identity for "this component instance": returns
/// the attached unique id or generates one and writes it back, so repeated
/// calls against the same argument map agree.
pub fn ensure_unique_id(args: &mut ArgMap) -> String {
    if let Some(existing) = unique_id(args) {
        return existing;
    }
    let fresh = random_id();
    let tag = CorrelationTag {
        unique_id: Some(fresh.clone()),
        ..CorrelationTag::default()
    };
    tag.attach(args);
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with(tag: &CorrelationTag) -> ArgMap {
        let mut args = ArgMap::new();
        tag.attach(&mut args);
        args
    }

    // -- Tag resolution ------------------------------------------------------

    #[test]
    fn require_ids_yields_both_when_complete() {
        let tag = CorrelationTag::for_request("owner-a", "req-1");
        assert!(tag.is_complete());
        assert_eq!(tag.require_ids().unwrap(), ("owner-a", "req-1"));
    }

    #[test]
    fn require_ids_names_the_missing_field() {
        let missing_owner = CorrelationTag {
            request_id: Some("req-1".into()),
            ..CorrelationTag::default()
        };
        assert_eq!(
            missing_owner.require_ids().unwrap_err(),
            Error::missing(OWNER_ID_KEY)
        );

        let missing_request = CorrelationTag {
            owner_id: Some("owner-a".into()),
            ..CorrelationTag::default()
        };
        assert_eq!(
            missing_request.require_ids().unwrap_err(),
            Error::missing(REQUEST_ID_KEY)
        );
    }

    // -- Attach / extract ------------------------------------------------------

    #[test]
    fn attach_then_extract_round_trips() {
        let tag = CorrelationTag::for_request("owner-a", "req-1").with_unique_id("u-9");
        let args = args_with(&tag);
        assert_eq!(CorrelationTag::extract(&args), tag);
    }

    #[test]
    fn extract_from_untagged_args_is_all_none() {
        let args = ArgMap::new();
        let tag = CorrelationTag::extract(&args);
        assert_eq!(tag, CorrelationTag::default());
        assert!(!tag.is_complete());
    }

    #[test]
    fn partial_attach_preserves_existing_fields() {
        let mut args = args_with(&CorrelationTag::for_request("owner-a", "req-1"));
        // A later attach that only carries the unique id must not erase the
        // request fields already on the transport.
        CorrelationTag {
            unique_id: Some("u-9".into()),
            ..CorrelationTag::default()
        }
        .attach(&mut args);

        let tag = CorrelationTag::extract(&args);
        assert_eq!(tag.owner_id.as_deref(), Some("owner-a"));
        assert_eq!(tag.request_id.as_deref(), Some("req-1"));
        assert_eq!(tag.unique_id.as_deref(), Some("u-9"));
    }

    #[test]
    fn foreign_value_under_the_reserved_key_is_replaced() {
        let mut args = ArgMap::new();
        args.insert(ATTACHMENT_KEY.to_string(), Value::from(42));
        CorrelationTag::for_request("owner-a", "req-1").attach(&mut args);
        assert!(CorrelationTag::extract(&args).is_complete());
    }

    #[test]
    fn non_string_fields_extract_as_none() {
        let mut args = ArgMap::new();
        let mut fields = Map::new();
        fields.insert(OWNER_ID_KEY.to_string(), Value::from(7));
        args.insert(ATTACHMENT_KEY.to_string(), Value::Object(fields));
        assert_eq!(CorrelationTag::extract(&args).owner_id, None);
    }

    #[test]
    fn tag_serde_round_trips() {
        let tag = CorrelationTag::for_request("owner-a", "req-1");
        let json = serde_json::to_string(&tag).unwrap();
        let back: CorrelationTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
    }

    // -- Identity ---------------------------------------------------------------

    #[test]
    fn ensure_unique_id_is_stable_per_arg_map() {
        let mut args = ArgMap::new();
        let first = ensure_unique_id(&mut args);
        let second = ensure_unique_id(&mut args);
        assert_eq!(first, second);
        assert_eq!(unique_id(&args).as_deref(), Some(first.as_str()));
    }

    #[test]
    fn ensure_unique_id_respects_an_attached_id() {
        let mut args = args_with(&CorrelationTag::default().with_unique_id("u-known"));
        assert_eq!(ensure_unique_id(&mut args), "u-known");
    }

    #[test]
    fn random_ids_are_distinct_and_hyphenated() {
        let a = random_id();
        let b = random_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);
    }
}
