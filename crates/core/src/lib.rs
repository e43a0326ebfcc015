//! kinspect core types: items, choices, topology snapshots and output rows.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

pub mod output;
pub mod topology;

pub use output::{Cell, Output, OutputSink, OutputStyle};
pub use topology::{Cluster, Namespace, Topology};

pub mod prelude {
    pub use super::{Choice, ChoiceData, InspectError, Item};
    pub use super::output::{Cell, Output, OutputSink, OutputStyle};
    pub use super::topology::{Cluster, Namespace, Topology};
}

/// Errors raised by core type conversions.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("invalid item: {0}")]
    InvalidItem(String),
}

/// A discovered resource.
///
/// Most resources arrive as JSON objects, but some sources only hand back a
/// bare name (namespace lists, context names). Both shapes are valid items and
/// every comparison routine matches on the variant explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Item {
    Identity(String),
    Structured(Map<String, Value>),
}

impl Item {
    pub fn identity(name: impl Into<String>) -> Self { Item::Identity(name.into()) }

    /// Convert an arbitrary JSON value. Objects become `Structured`, strings
    /// become `Identity`; anything else is rejected.
    pub fn try_from_value(v: Value) -> Result<Self, InspectError> {
        match v {
            Value::Object(map) => Ok(Item::Structured(map)),
            Value::String(s) => Ok(Item::Identity(s)),
            other => Err(InspectError::InvalidItem(format!("expected object or string, got {}", kind_of(&other)))),
        }
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            Item::Structured(m) => Some(m),
            Item::Identity(_) => None,
        }
    }

    /// Look up a field at the top level, falling back to `metadata.<key>`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        let map = self.as_map()?;
        map.get(key)
            .or_else(|| map.get("metadata").and_then(|m| m.get(key)))
    }

    /// Field rendered as display text. Strings are taken verbatim, other
    /// scalars use their JSON rendering; null and missing yield `None`.
    pub fn field_text(&self, key: &str) -> Option<String> {
        match self.field(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Identity name: the first of `fields` present on the item, or `name`
    /// when no fields are given. Bare identities are their own name.
    pub fn name_by(&self, fields: &[String]) -> String {
        match self {
            Item::Identity(s) => s.clone(),
            Item::Structured(_) => {
                if fields.is_empty() {
                    return self.field_text("name").unwrap_or_default();
                }
                fields
                    .iter()
                    .find_map(|f| self.field_text(f))
                    .unwrap_or_default()
            }
        }
    }

    pub fn name(&self) -> String { self.name_by(&[]) }

    /// Namespace embedded in the record, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.field("namespace").and_then(|v| v.as_str())
    }

    pub fn to_value(&self) -> Value {
        match self {
            Item::Identity(s) => Value::String(s.clone()),
            Item::Structured(m) => Value::Object(m.clone()),
        }
    }
}

impl From<Map<String, Value>> for Item {
    fn from(m: Map<String, Value>) -> Self { Item::Structured(m) }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Provenance and payload carried by a choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceData {
    pub title: String,
    pub namespace: Option<String>,
    pub cluster: String,
    pub item: Item,
    /// Extra display fields extracted from the item, in request order.
    pub fields: SmallVec<[(String, String); 4]>,
}

/// A presentation-ready wrapper around one item.
///
/// `display` ordering is significant: index 0 is the primary sort key and
/// index 1 the namespace tie-breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub display: SmallVec<[String; 4]>,
    pub data: ChoiceData,
}

impl Choice {
    pub fn primary(&self) -> &str { self.display.first().map(String::as_str).unwrap_or("") }
    pub fn secondary(&self) -> &str { self.display.get(1).map(String::as_str).unwrap_or("") }

    /// Display strings joined for filtering and plain listings.
    pub fn label(&self) -> String {
        self.display.iter().filter(|s| !s.is_empty()).cloned().collect::<Vec<_>>().join(" ")
    }
}
