use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cid::Cid;
use crate::clock::Clock;

/// Default branch name.
pub const MAIN_BRANCH: &str = "main";

/// Per-branch header: the committed root pointers for one branch.
///
/// Headers are small and mutable. A commit always replaces the whole header;
/// readers never observe a partial update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Named roots (e.g. `"index"`, `"by_id"`).
    #[serde(default)]
    pub roots: BTreeMap<String, Cid>,
    /// Change-feed position these roots reflect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<Clock>,
    /// Most recent bundle written for this branch; the head of the bundle log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Cid>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, name: impl Into<String>, cid: Cid) -> Self {
        self.roots.insert(name.into(), cid);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn root(&self, name: &str) -> Option<Cid> {
        self.roots.get(name).copied()
    }

    /// Serialize to the JSON wire/file form.
    pub fn to_json(&self) -> Result<Vec<u8>, crate::TypeError> {
        serde_json::to_vec(self).map_err(|e| crate::TypeError::Serialization(e.to_string()))
    }

    /// Parse from the JSON wire/file form.
    pub fn from_json(data: &[u8]) -> Result<Self, crate::TypeError> {
        serde_json::from_slice(data).map_err(|e| crate::TypeError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let header = Header::new()
            .with_root("index", Cid::from_bytes(b"root"))
            .with_clock(Clock::from(Cid::from_bytes(b"event")));
        let bytes = header.to_json().unwrap();
        assert_eq!(Header::from_json(&bytes).unwrap(), header);
    }

    #[test]
    fn empty_object_parses_as_default() {
        assert_eq!(Header::from_json(b"{}").unwrap(), Header::default());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            Header::from_json(b"not json"),
            Err(crate::TypeError::Serialization(_))
        ));
    }
}
