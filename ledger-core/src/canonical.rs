//! Canonical payload rendering for cryptographic hashing
//!
//! Equivalent payloads must render to identical strings in any process,
//! forever: keys sort lexicographically at every nesting level, decimals
//! normalize away trailing zeros, and strings escape deterministically.
//! The output is compact JSON-shaped text, but it is a hashing input, not a
//! wire format.

use crate::types::{Payload, PayloadValue};
use std::collections::BTreeMap;

/// Render a payload to its canonical string form
pub fn canonical_string(payload: &Payload) -> String {
    let mut out = String::new();
    write_map(&mut out, payload);
    out
}

fn write_value(out: &mut String, value: &PayloadValue) {
    match value {
        PayloadValue::Null => out.push_str("null"),
        PayloadValue::Bool(true) => out.push_str("true"),
        PayloadValue::Bool(false) => out.push_str("false"),
        PayloadValue::Int(i) => out.push_str(&i.to_string()),
        // Normalize so 1100.00 and 1100 render identically
        PayloadValue::Number(d) => out.push_str(&d.normalize().to_string()),
        PayloadValue::Text(s) => write_string(out, s),
        PayloadValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        PayloadValue::Map(map) => write_map(out, map),
    }
}

fn write_map(out: &mut String, map: &BTreeMap<String, PayloadValue>) {
    out.push('{');
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
