//! Index entries, documents, and the map-function contract.

use std::cmp::Ordering;
use std::sync::Arc;

use kiln_tree::{TreeError, TreeKey, TreeResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MapError;
use crate::keys::{EncodedKey, KeyValue};

/// Tie-break component of an index key.
///
/// Stored entries always carry `Doc`. `Rank` only appears in range bounds:
/// [`RowRef::LOWEST`] and [`RowRef::HIGHEST`] sort before and after every
/// stored reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowRef {
    Rank(#[serde(with = "rank")] f64),
    Doc(String),
}

/// JSON has no NaN or infinity, so non-finite ranks are stored as
/// `{"rank": "nan" | "inf" | "-inf"}`.
mod rank {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        NonFinite { rank: String },
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = if value.is_finite() {
            Repr::Finite(*value)
        } else {
            let rank = if value.is_nan() {
                "nan"
            } else if value.is_sign_positive() {
                "inf"
            } else {
                "-inf"
            };
            Repr::NonFinite { rank: rank.into() }
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Finite(value) => Ok(value),
            Repr::NonFinite { rank } => match rank.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("unknown rank {other:?}"))),
            },
        }
    }
}

impl RowRef {
    pub const LOWEST: RowRef = RowRef::Rank(f64::NAN);
    pub const HIGHEST: RowRef = RowRef::Rank(f64::INFINITY);
}

/// Compare a probe reference `a` with a stored reference `b`.
///
/// A NaN probe is below everything and an infinite probe above everything.
/// A stored NaN is invalid.
pub fn compare_refs(a: &RowRef, b: &RowRef) -> TreeResult<Ordering> {
    if matches!(a, RowRef::Rank(r) if r.is_nan()) {
        return Ok(Ordering::Less);
    }
    if matches!(b, RowRef::Rank(r) if r.is_nan()) {
        return Err(TreeError::Validation(
            "stored reference may not be NaN".into(),
        ));
    }
    if matches!(a, RowRef::Rank(r) if r.is_infinite()) {
        return Ok(Ordering::Greater);
    }
    Ok(match (a, b) {
        (RowRef::Rank(x), RowRef::Rank(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (RowRef::Rank(_), RowRef::Doc(_)) => Ordering::Less,
        (RowRef::Doc(_), RowRef::Rank(_)) => Ordering::Greater,
        (RowRef::Doc(x), RowRef::Doc(y)) => x.cmp(y),
    })
}

/// Compound key of the primary index: emitted key, then document id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexKey {
    pub key: EncodedKey,
    pub reference: RowRef,
}

impl IndexKey {
    pub fn for_doc(key: &KeyValue, id: impl Into<String>) -> Self {
        Self {
            key: key.encode(),
            reference: RowRef::Doc(id.into()),
        }
    }

    /// Smallest compound key with emitted key `key`.
    pub fn lower_bound(key: &KeyValue) -> Self {
        Self {
            key: key.encode(),
            reference: RowRef::LOWEST,
        }
    }

    /// Largest compound key with emitted key `key`.
    pub fn upper_bound(key: &KeyValue) -> Self {
        Self {
            key: key.encode(),
            reference: RowRef::HIGHEST,
        }
    }
}

impl TreeKey for IndexKey {
    fn compare(&self, stored: &Self) -> TreeResult<Ordering> {
        match self.key.cmp(&stored.key) {
            Ordering::Equal => compare_refs(&self.reference, &stored.reference),
            other => Ok(other),
        }
    }
}

/// A document as a map function sees it: the body with `_id` set.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    id: String,
    body: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        let id = id.into();
        let body = match body {
            Value::Object(mut fields) => {
                fields.insert("_id".into(), Value::String(id.clone()));
                Value::Object(fields)
            }
            other => {
                let mut fields = Map::new();
                fields.insert("_id".into(), Value::String(id.clone()));
                fields.insert("value".into(), other);
                Value::Object(fields)
            }
        };
        Self { id, body }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }
}

/// Collects the `(key, value)` pairs a map function emits for one document.
#[derive(Debug, Default)]
pub struct Emitter {
    emitted: Vec<(KeyValue, Value)>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, key: impl Into<KeyValue>, value: Value) {
        self.emitted.push((key.into(), value));
    }

    pub fn len(&self) -> usize {
        self.emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
    }

    pub fn into_entries(self) -> Vec<(KeyValue, Value)> {
        self.emitted
    }
}

/// A map function: inspects one document and emits zero or more entries.
/// Must be deterministic.
pub type MapFn = Arc<dyn Fn(&Document, &mut Emitter) -> Result<(), MapError> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str) -> RowRef {
        RowRef::Doc(id.into())
    }

    #[test]
    fn nan_probe_is_lowest() {
        assert_eq!(compare_refs(&RowRef::LOWEST, &doc("a")).unwrap(), Ordering::Less);
        assert_eq!(
            compare_refs(&RowRef::LOWEST, &RowRef::Rank(-1e300)).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn stored_nan_is_rejected() {
        assert!(matches!(
            compare_refs(&doc("a"), &RowRef::LOWEST),
            Err(TreeError::Validation(_))
        ));
    }

    #[test]
    fn infinite_probe_is_highest() {
        assert_eq!(compare_refs(&RowRef::HIGHEST, &doc("zzz")).unwrap(), Ordering::Greater);
    }

    #[test]
    fn ranks_before_docs_then_docs_by_string() {
        assert_eq!(compare_refs(&RowRef::Rank(5.0), &doc("a")).unwrap(), Ordering::Less);
        assert_eq!(compare_refs(&doc("a"), &RowRef::Rank(5.0)).unwrap(), Ordering::Greater);
        assert_eq!(compare_refs(&RowRef::Rank(1.0), &RowRef::Rank(2.0)).unwrap(), Ordering::Less);
        assert_eq!(compare_refs(&doc("10"), &doc("9")).unwrap(), Ordering::Less);
    }

    #[test]
    fn index_key_orders_by_key_then_reference() {
        let a = IndexKey::for_doc(&KeyValue::from(1), "z");
        let b = IndexKey::for_doc(&KeyValue::from(2), "a");
        let c = IndexKey::for_doc(&KeyValue::from(2), "b");
        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);
        assert_eq!(b.compare(&c).unwrap(), Ordering::Less);
        assert_eq!(
            IndexKey::lower_bound(&KeyValue::from(2)).compare(&b).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            IndexKey::upper_bound(&KeyValue::from(2)).compare(&c).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn index_key_serializes_doc_ref_as_string() {
        let key = IndexKey::for_doc(&KeyValue::Null, "doc-1");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json, json!({"key": "01", "reference": "doc-1"}));
        let back: IndexKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn document_carries_id() {
        let d = Document::new("1", json!({"title": "abc"}));
        assert_eq!(d.id(), "1");
        assert_eq!(d.get("_id"), Some(&json!("1")));
        assert_eq!(d.get("title"), Some(&json!("abc")));
    }

    #[test]
    fn non_object_body_is_wrapped() {
        let d = Document::new("n", json!(42));
        assert_eq!(d.get("value"), Some(&json!(42)));
    }

    #[test]
    fn emitter_collects_pairs() {
        let mut emitter = Emitter::new();
        emitter.emit(3, json!("abc"));
        emitter.emit("k", Value::Null);
        assert_eq!(emitter.len(), 2);
        let entries = emitter.into_entries();
        assert_eq!(entries[0], (KeyValue::from(3), json!("abc")));
    }

    #[test]
    fn non_finite_ranks_survive_json() {
        let key = IndexKey::lower_bound(&KeyValue::from(1));
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["reference"], json!({"rank": "nan"}));
        let back: IndexKey = serde_json::from_value(json).unwrap();
        assert!(matches!(back.reference, RowRef::Rank(r) if r.is_nan()));

        let high: RowRef = serde_json::from_value(json!({"rank": "inf"})).unwrap();
        assert!(matches!(high, RowRef::Rank(r) if r == f64::INFINITY));
        let plain: RowRef = serde_json::from_value(json!(2.5)).unwrap();
        assert_eq!(plain, RowRef::Rank(2.5));
    }
}
