//! Canonical hashing of parameter structures.
//!
//! A fingerprint is the SHA-256 digest of a canonical byte encoding of a
//! JSON value. The encoding sorts mapping keys, tags every scalar with its
//! type and length-prefixes strings and containers, so two structurally
//! equal values always hash the same and `1` never collides with `"1"`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Length of a fingerprint in hex characters (256-bit digest).
pub const FINGERPRINT_LEN: usize = 64;

/// Opaque, fixed-length identifier of a parameter structure.
///
/// Doubles as the request id handed back to callers and as the file stem
/// of every persisted entry, so it is always lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse an externally supplied request id.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != FINGERPRINT_LEN
            || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(Error::Validation(format!(
                "'{s}' is not a request id (expected {FINGERPRINT_LEN} lowercase hex characters)"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Fingerprint a JSON value.
pub fn fingerprint(value: &Value) -> Fingerprint {
    let mut buf = Vec::with_capacity(256);
    encode(value, &mut buf);
    Fingerprint(hex::encode(Sha256::digest(&buf)))
}

/// Fingerprint any serializable structure.
///
/// Fails only for values serde_json cannot represent (e.g. maps with
/// non-string keys), which is a programming error at the call site.
pub fn fingerprint_of(value: &impl Serialize) -> Result<Fingerprint> {
    let value = serde_json::to_value(value)
        .map_err(|e| Error::Validation(format!("unhashable parameters: {e}")))?;
    Ok(fingerprint(&value))
}

/// Canonical byte encoding. Exposed for tests and benches.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode(value, &mut buf);
    buf
}

fn encode(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(b'n'),
        Value::Bool(b) => {
            out.push(b'b');
            out.push(u8::from(*b));
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push(b'i');
                out.extend_from_slice(&i.to_be_bytes());
            } else if let Some(u) = n.as_u64() {
                out.push(b'u');
                out.extend_from_slice(&u.to_be_bytes());
            } else {
                // -0.0 and 0.0 compare equal, so they must hash equal
                let f = n.as_f64().unwrap_or_default();
                let f = if f == 0.0 { 0.0 } else { f };
                out.push(b'f');
                out.extend_from_slice(&f.to_bits().to_be_bytes());
            }
        }
        Value::String(s) => encode_str(s, out),
        Value::Array(items) => {
            out.push(b'a');
            out.extend_from_slice(&(items.len() as u64).to_be_bytes());
            for item in items {
                encode(item, out);
            }
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'o');
            out.extend_from_slice(&(entries.len() as u64).to_be_bytes());
            for (key, val) in entries {
                encode_str(key, out);
                encode(val, out);
            }
        }
    }
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.push(b's');
    out.extend_from_slice(&(s.len() as u64).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let mut a = serde_json::Map::new();
        a.insert("start".into(), json!("2020-01-01"));
        a.insert("terms".into(), json!(["mask"]));
        let mut b = serde_json::Map::new();
        b.insert("terms".into(), json!(["mask"]));
        b.insert("start".into(), json!("2020-01-01"));
        assert_eq!(fingerprint(&Value::Object(a)), fingerprint(&Value::Object(b)));
    }

    #[test]
    fn scalars_are_type_tagged() {
        assert_ne!(fingerprint(&json!(1)), fingerprint(&json!("1")));
        assert_ne!(fingerprint(&json!(1)), fingerprint(&json!(1.0)));
        assert_ne!(fingerprint(&json!(true)), fingerprint(&json!(1)));
        assert_ne!(fingerprint(&json!(null)), fingerprint(&json!("")));
    }

    #[test]
    fn strings_are_length_prefixed() {
        assert_ne!(fingerprint(&json!(["ab", "c"])), fingerprint(&json!(["a", "bc"])));
    }

    #[test]
    fn sequence_order_matters() {
        assert_ne!(fingerprint(&json!([1, 2])), fingerprint(&json!([2, 1])));
    }

    #[test]
    fn negative_zero_hashes_like_zero() {
        assert_eq!(fingerprint(&json!(-0.0)), fingerprint(&json!(0.0)));
    }

    #[test]
    fn fingerprint_is_fixed_length_hex() {
        let fp = fingerprint(&json!({"a": 1}));
        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN);
        assert!(Fingerprint::parse(fp.as_str()).is_ok());
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn parse_rejects_path_like_ids() {
        assert!(Fingerprint::parse("../../etc/passwd").is_err());
        assert!(Fingerprint::parse(&"A".repeat(FINGERPRINT_LEN)).is_err());
        assert!(Fingerprint::parse("abc").is_err());
    }

    #[test]
    fn fingerprint_of_matches_value_form() {
        #[derive(Serialize)]
        struct Args {
            topic_count: usize,
            step_days: u32,
        }
        let typed = fingerprint_of(&Args { topic_count: 5, step_days: 7 }).unwrap();
        let value = fingerprint(&json!({"step_days": 7, "topic_count": 5}));
        assert_eq!(typed, value);
    }

    #[test]
    fn serde_roundtrip_validates() {
        let fp = fingerprint(&json!("x"));
        let json = serde_json::to_string(&fp).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
        assert!(serde_json::from_str::<Fingerprint>("\"nothex\"").is_err());
    }
}
