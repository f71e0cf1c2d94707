//! URL component encoding and JSON value stringification for request building.

use serde_json::Value;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Percent-encode a value for substitution into a path template.
///
/// Matches `encodeURIComponent`: everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )` is escaped,
/// so `/`, `?` and `#` in a value can never change the request target.
#[must_use]
pub fn encode_path_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

/// Convert a JSON value to the string form used in paths, query strings and headers.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

/// Expand one query argument into `(key, value)` pairs.
///
/// Arrays use the `OpenAPI` default (`style=form, explode=true`): one pair per item. `null`
/// produces no pairs.
#[must_use]
pub fn query_pairs(name: &str, value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| (name.to_string(), value_to_string(v)))
            .collect(),
        other => vec![(name.to_string(), value_to_string(other))],
    }
}
