//! Change events consumed from the document feed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;

/// One change-feed row: the latest state of a single document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Document id.
    pub key: String,
    /// Document body, absent for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Whether the document was deleted.
    #[serde(default)]
    pub del: bool,
}

impl Change {
    pub fn put(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            del: false,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            del: true,
        }
    }

    /// Returns `true` if this change carries a live document body.
    pub fn is_live(&self) -> bool {
        !self.del && self.value.is_some()
    }
}

/// The answer to `changes_since`: rows plus the clock to adopt afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub rows: Vec<Change>,
    pub clock: Clock,
}
