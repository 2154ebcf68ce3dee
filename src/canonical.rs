//! Hand-rolled canonical JSON encoding for signed payloads.
//!
//! The signed byte sequence is the integrity boundary for both credentials and
//! receipts. Rather than deriving `Serialize` and hoping a map/struct's field
//! order never drifts across `serde_json` versions, every signed payload is
//! built field-by-field in a fixed call order, with undefined (`None`) fields
//! omitted entirely and no incidental whitespace.

use serde_json::Value;

/// A single field to be rendered into a canonical JSON object, in call order.
pub struct Field<'a> {
    pub key: &'a str,
    pub value: Option<Value>,
}

pub fn field(key: &str, value: Value) -> Field<'_> {
    Field {
        key,
        value: Some(value),
    }
}

pub fn optional_field(key: &str, value: Option<Value>) -> Field<'_> {
    Field { key, value }
}

/// Render an ordered list of fields into a compact canonical JSON object string.
/// Fields whose value is `None` are omitted (the "undefined fields omitted" rule).
pub fn canonical_object(fields: &[Field<'_>]) -> String {
    let mut out = String::from("{");
    let mut first = true;
    for f in fields {
        let Some(value) = &f.value else { continue };
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&serde_json::to_string(f.key).expect("string keys always serialize"));
        out.push(':');
        out.push_str(&canonical_value(value));
    }
    out.push('}');
    out
}

/// Canonicalize an arbitrary `Value` recursively: objects get their keys sorted so
/// nested maps are deterministic even though the top-level payload fields use a
/// fixed, non-alphabetical call order.
fn canonical_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).expect("string keys always serialize"));
                out.push(':');
                out.push_str(&canonical_value(&map[*k]));
            }
            out.push('}');
            out
        }
        Value::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonical_value(item));
            }
            out.push(']');
            out
        }
        // Strings, numbers, bools, null: serde_json's compact encoding is already
        // whitespace-free and deterministic for scalars.
        other => serde_json::to_string(other).expect("scalar values always serialize"),
    }
}
