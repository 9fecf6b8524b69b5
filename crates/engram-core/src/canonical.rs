//! Canonical JSON encoding and content addressing
//!
//! Every digest and identifier in Engram derives from the canonical byte form
//! produced here: object keys sorted ASCII-lex, array order preserved,
//! non-finite numbers collapsed to `null`. The encoding is independent of the
//! map representation `serde_json` was compiled with, so two processes always
//! agree on bytes.
//!
//! Identifiers take the form `prefix_<first 12 hex of SHA-256>`. Collisions
//! are treated as logic bugs, not handled.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Number of leading hex characters carried into a minted identifier.
const ID_HEX_LEN: usize = 12;

/// Rebuild a JSON value in canonical form.
///
/// Object keys are sorted ASCII-lex, arrays keep their order, and any
/// non-finite number is coerced to `null` so the output is always valid JSON.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (key, item) in entries {
                out.insert(key.clone(), canonicalize(item));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if !f.is_finite() => Value::Null,
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Serialize a value to its canonical compact string form.
pub fn stringify(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// SHA-256 digest (64 hex chars) of the canonical form of `value`.
pub fn digest(value: &Value) -> String {
    let canonical = stringify(value);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Mint an identifier from a digest: `prefix_<first 12 hex>`.
pub fn make_id(prefix: &str, digest_hex: &str) -> String {
    let head: String = digest_hex.chars().take(ID_HEX_LEN).collect();
    format!("{prefix}_{head}")
}

/// Round to six decimal places.
///
/// Applied to every float that reaches a digest so platforms with different
/// float formatting still produce identical canonical bytes.
pub fn round6(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let rounded = (value * 1_000_000.0).round() / 1_000_000.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => match n.as_f64() {
            Some(f) if !f.is_finite() => out.push_str("null"),
            _ => out.push_str(&n.to_string()),
        },
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                if let Some(item) = map.get(*key) {
                    write_canonical(item, out);
                }
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted() {
        let value = json!({"zeta": 1, "alpha": 2, "mid": {"b": 1, "a": 2}});
        assert_eq!(
            stringify(&value),
            r#"{"alpha":2,"mid":{"a":2,"b":1},"zeta":1}"#
        );
    }

    #[test]
    fn array_order_is_preserved() {
        let value = json!(["c", "a", "b"]);
        assert_eq!(stringify(&value), r#"["c","a","b"]"#);
    }

    #[test]
    fn control_characters_are_escaped() {
        let value = json!("line\nbreak\ttab\u{0001}");
        assert_eq!(stringify(&value), "\"line\\nbreak\\ttab\\u0001\"");
    }

    #[test]
    fn digest_is_stable_across_key_order() {
        let a = json!({"x": 1, "y": [1, 2, 3]});
        let b = json!({"y": [1, 2, 3], "x": 1});
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn make_id_takes_twelve_hex() {
        let d = digest(&json!({"k": "v"}));
        let id = make_id("evt", &d);
        assert_eq!(id.len(), 4 + 12);
        assert!(id.starts_with("evt_"));
        assert_eq!(&id[4..], &d[..12]);
    }

    #[test]
    fn round6_collapses_noise() {
        assert_eq!(round6(0.1 + 0.2), 0.3);
        assert_eq!(round6(-0.0), 0.0);
        assert_eq!(round6(f64::NAN), 0.0);
        assert_eq!(round6(1.0000004), 1.0);
    }

    #[test]
    fn canonicalize_collapses_non_finite() {
        let mut map = serde_json::Map::new();
        map.insert("ok".to_string(), json!(1.5));
        let value = canonicalize(&Value::Object(map));
        assert_eq!(stringify(&value), r#"{"ok":1.5}"#);
    }
}
