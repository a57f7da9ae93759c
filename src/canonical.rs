//! Canonical byte encoding used for every digest and signature on the chain.
//!
//! `CanonicalBytes` has a private inner field; the only constructors are
//! [`CanonicalBytes::new`] (structured values) and [`CanonicalBytes::raw`]
//! (bytes that are already in their final form). Signing and verifying both
//! accept `&CanonicalBytes`, so the two paths cannot drift apart.
//!
//! Structured values are serialized as compact JSON with object keys sorted
//! lexicographically at every nesting level, UTF-8 encoded. This matches
//! `json.dumps(obj, sort_keys=True, separators=(",", ":"))`.

use crate::error::{ChainError, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Canonicalize any serializable value.
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| ChainError::Serialization(format!("Cannot canonicalize value: {}", e)))?;
        // serde_json's default map is a BTreeMap, so keys come out sorted.
        let bytes = serde_json::to_vec(&sort_keys(value))?;
        Ok(Self(bytes))
    }

    /// Raw bytes pass through untouched.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 of the canonical bytes, hex encoded.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.0))
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Shorthand for [`CanonicalBytes::new`].
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<CanonicalBytes> {
    CanonicalBytes::new(value)
}

/// Rebuilds every object so key order does not depend on how the map was
/// populated, even if `serde_json` is compiled with `preserve_order`.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sorted_compact_output() {
        let data = json!({"b": 2, "a": 1, "c": "hello"});
        let cb = CanonicalBytes::new(&data).unwrap();
        assert_eq!(cb.as_bytes(), br#"{"a":1,"b":2,"c":"hello"}"#);
    }

    #[test]
    fn test_nested_objects_sorted() {
        let data = json!({"outer": {"z": true, "a": null}, "list": [3, {"y": 1, "x": 2}]});
        let cb = CanonicalBytes::new(&data).unwrap();
        assert_eq!(
            std::str::from_utf8(cb.as_bytes()).unwrap(),
            r#"{"list":[3,{"x":2,"y":1}],"outer":{"a":null,"z":true}}"#
        );
    }

    #[test]
    fn test_struct_field_order_irrelevant() {
        #[derive(Serialize)]
        struct Zyx {
            zeta: u8,
            alpha: u8,
        }
        let cb = CanonicalBytes::new(&Zyx { zeta: 1, alpha: 2 }).unwrap();
        assert_eq!(cb.as_bytes(), br#"{"alpha":2,"zeta":1}"#);
    }

    #[test]
    fn test_raw_passthrough() {
        let cb = CanonicalBytes::raw(vec![0xde, 0xad]);
        assert_eq!(cb.as_bytes(), &[0xde, 0xad]);
    }

    #[test]
    fn test_string_is_quoted() {
        let cb = canonicalize("abc").unwrap();
        assert_eq!(cb.as_bytes(), br#""abc""#);
    }

    #[test]
    fn test_non_ascii_utf8() {
        let cb = canonicalize(&json!({"name": "Đại học"})).unwrap();
        assert_eq!(
            std::str::from_utf8(cb.as_bytes()).unwrap(),
            "{\"name\":\"Đại học\"}"
        );
    }
}
