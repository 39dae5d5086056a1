//! Headers envelope — a case-insensitive, title-cased key/value map carried
//! alongside every action's payload.
//!
//! Keys are normalized the moment they cross the boundary of this type:
//! spaces become hyphens, then the whole key is title-cased word-by-word
//! (`offset` → `Offset`, `adler 32` → `Adler-32`). Values are arbitrary
//! JSON-serializable data (`serde_json::Value`), since headers are encoded
//! with whichever scheme the connection negotiated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved header names the engine itself reads or writes.
pub mod key {
    pub const STATUS: &str = "Status";
    pub const OFFSET: &str = "Offset";
    pub const SKIP: &str = "Skip";
    pub const FILES: &str = "Files";
    pub const ADLER32: &str = "Adler32";
}

#[derive(Debug, thiserror::Error)]
pub enum HeadersError {
    #[error("{0} must be a non-negative integer")]
    NegativeOffset(&'static str),
}

/// Case-insensitive headers map. Internally stored with normalized keys so
/// lookups never have to re-normalize the stored side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, Value>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// `key.replace(' ', '-').title()` semantics: split on existing hyphens
    /// too (title-case is applied per word), spaces become hyphens first.
    pub fn normalize_key(key: &str) -> String {
        key.replace(' ', "-")
            .split('-')
            .map(title_case_word)
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(&Self::normalize_key(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&Self::normalize_key(key))
    }

    /// Insert a value, validating `Offset`/`Skip` are non-negative integers
    /// per the reference implementation's `Headers.__init__`/`__setitem__`.
    pub fn insert(&mut self, key: &str, value: Value) -> Result<(), HeadersError> {
        let normalized = Self::normalize_key(key);
        if normalized == key::OFFSET || normalized == key::SKIP {
            let ok = value.as_i64().map(|v| v >= 0).unwrap_or(false);
            if !ok {
                let name = if normalized == key::OFFSET { "Offset" } else { "Skip" };
                return Err(HeadersError::NegativeOffset(name));
            }
        }
        self.0.insert(normalized, value);
        Ok(())
    }

    /// Insert without the Offset/Skip validation, for internal engine use
    /// (e.g. stamping `Files` from the codec, which is never negative by
    /// construction).
    pub fn insert_raw(&mut self, key: &str, value: Value) {
        self.0.insert(Self::normalize_key(key), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(&Self::normalize_key(key))
    }

    /// Bulk update: insert every pair, normalizing keys and validating
    /// `Offset`/`Skip` exactly like a single `insert`. Stops at the first
    /// rejected pair, leaving whatever was already inserted in place — same
    /// as calling `insert` in a loop.
    pub fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, pairs: I) -> Result<(), HeadersError> {
        for (key, value) in pairs {
            self.insert(&key, value)?;
        }
        Ok(())
    }

    /// Drop both `Offset` and `Skip`, e.g. once a codec has consumed the
    /// truncation they request and stamped its own post-truncation sizes.
    pub fn clear_offset(&mut self) {
        self.0.remove(key::OFFSET);
        self.0.remove(key::SKIP);
    }

    pub fn status(&self) -> i64 {
        self.get(key::STATUS).and_then(Value::as_i64).unwrap_or(200)
    }

    pub fn set_status(&mut self, status: i64) {
        self.0.insert(key::STATUS.to_string(), Value::from(status));
    }

    /// `Offset` is canonical; `Skip` is the v2-only alias read if `Offset`
    /// is absent.
    pub fn offset(&self) -> u64 {
        self.get(key::OFFSET)
            .or_else(|| self.get(key::SKIP))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Encode with the given scheme. Never fails: callers that need to
    /// surface a scheme error should call the scheme directly; this exists
    /// to mirror the reference `Headers.encode`, which cannot fail because
    /// every stored value is already JSON-representable.
    pub fn encode(&self, scheme: &crate::scheme::Scheme) -> Vec<u8> {
        scheme.dumps(&self.0).unwrap_or_default()
    }

    /// Decode, treating any failure as empty headers — malformed headers
    /// are absent headers, never a propagated error (§4.2).
    pub fn decode(scheme: &crate::scheme::Scheme, buf: &[u8]) -> Self {
        if buf.is_empty() {
            return Self::default();
        }
        match scheme.loads::<BTreeMap<String, Value>>(buf) {
            Ok(map) => {
                let mut headers = Self::default();
                for (k, v) in map {
                    headers.0.insert(Self::normalize_key(&k), v);
                }
                headers
            }
            Err(_) => Self::default(),
        }
    }
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_spaces_and_case() {
        assert_eq!(Headers::normalize_key("offset"), "Offset");
        assert_eq!(Headers::normalize_key("adler32"), "Adler32");
        assert_eq!(Headers::normalize_key("content type"), "Content-Type");
        assert_eq!(Headers::normalize_key("X-FOO"), "X-Foo");
    }

    #[test]
    fn insert_and_get_are_case_insensitive() {
        let mut h = Headers::new();
        h.insert("foo", Value::from(1)).unwrap();
        h.insert("Offset", Value::from(2)).unwrap();
        assert_eq!(h.get("FOO"), Some(&Value::from(1)));
        assert_eq!(h.get("offset"), Some(&Value::from(2)));
    }

    #[test]
    fn negative_offset_is_rejected() {
        let mut h = Headers::new();
        assert!(h.insert("offset", Value::from(-1)).is_err());
        assert!(h.insert("skip", Value::from(-5)).is_err());
        assert!(h.insert("offset", Value::from(0)).is_ok());
    }

    #[test]
    fn default_status_is_200() {
        let h = Headers::new();
        assert_eq!(h.status(), 200);
    }

    #[test]
    fn skip_is_read_as_offset_fallback() {
        let mut h = Headers::new();
        h.insert("Skip", Value::from(5)).unwrap();
        assert_eq!(h.offset(), 5);
    }

    #[test]
    fn extend_normalizes_every_key_and_validates_offset() {
        let mut h = Headers::new();
        h.extend(vec![("content type".to_string(), Value::from("text")), ("offset".to_string(), Value::from(3))])
            .unwrap();
        assert_eq!(h.get("Content-Type"), Some(&Value::from("text")));
        assert_eq!(h.offset(), 3);

        let mut bad = Headers::new();
        assert!(bad.extend(vec![("offset".to_string(), Value::from(-1))]).is_err());
    }

    #[test]
    fn clear_offset_removes_both_aliases() {
        let mut h = Headers::new();
        h.insert("Offset", Value::from(5)).unwrap();
        h.insert("Skip", Value::from(9)).unwrap();
        h.clear_offset();
        assert_eq!(h.offset(), 0);
        assert!(!h.contains_key("Offset"));
        assert!(!h.contains_key("Skip"));
    }

    #[test]
    fn non_string_keys_cannot_exist() {
        // Headers is keyed by String at the type level; this test documents
        // that invariant rather than exercising a runtime check.
        let h = Headers::new();
        assert!(h.is_empty());
    }
}
