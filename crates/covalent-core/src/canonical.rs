//! Canonical CBOR encoding for hashing and signing.
//!
//! Headers and transactions are hashed over a deterministic encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//!
//! JSON payloads (header meta, trusting changes) are embedded as text, so the
//! encoding never depends on how a JSON library orders object keys.

use ciborium::value::Value;

use crate::header::{CoValueHeader, Ruleset};
use crate::transaction::Transaction;

/// Header field keys (integer keys for compact encoding).
mod header_keys {
    pub const CONTENT_TYPE: u64 = 0;
    pub const RULESET: u64 = 1;
    pub const META: u64 = 2;
    pub const UNIQUENESS: u64 = 3;
    pub const CREATED_AT: u64 = 4;
}

/// Transaction field keys.
mod tx_keys {
    pub const PRIVACY: u64 = 0;
    pub const MADE_AT: u64 = 1;
    pub const CHANGES: u64 = 2;
    pub const KEY_USED: u64 = 3;
    pub const META: u64 = 4;
}

const PRIVACY_TRUSTING: u64 = 0;
const PRIVACY_PRIVATE: u64 = 1;

/// Encode a header to canonical CBOR bytes.
pub fn header_bytes(header: &CoValueHeader) -> Vec<u8> {
    encode_canonical(&header_to_cbor_value(header))
}

/// Encode a transaction to canonical CBOR bytes.
pub fn transaction_bytes(tx: &Transaction) -> Vec<u8> {
    encode_canonical(&transaction_to_cbor_value(tx))
}

fn int(n: u64) -> Value {
    Value::Integer(n.into())
}

fn opt_text(s: Option<&str>) -> Value {
    s.map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null)
}

fn header_to_cbor_value(header: &CoValueHeader) -> Value {
    let ruleset = match &header.ruleset {
        Ruleset::Group { initial_admin } => Value::Array(vec![
            Value::Text("group".into()),
            Value::Text(initial_admin.to_string()),
        ]),
        Ruleset::OwnedByGroup { group } => Value::Array(vec![
            Value::Text("ownedByGroup".into()),
            Value::Text(group.to_string()),
        ]),
        Ruleset::UnsafeAllowAll => Value::Array(vec![Value::Text("unsafeAllowAll".into())]),
    };

    let meta = header.meta.as_ref().map(canonical_json);

    Value::Map(vec![
        (
            int(header_keys::CONTENT_TYPE),
            Value::Text(header.content_type.clone()),
        ),
        (int(header_keys::RULESET), ruleset),
        (int(header_keys::META), opt_text(meta.as_deref())),
        (
            int(header_keys::UNIQUENESS),
            Value::Text(header.uniqueness.clone()),
        ),
        (
            int(header_keys::CREATED_AT),
            header.created_at.map(int).unwrap_or(Value::Null),
        ),
    ])
}

fn transaction_to_cbor_value(tx: &Transaction) -> Value {
    match tx {
        Transaction::Trusting {
            made_at,
            changes,
            meta,
        } => Value::Map(vec![
            (int(tx_keys::PRIVACY), int(PRIVACY_TRUSTING)),
            (int(tx_keys::MADE_AT), int(*made_at)),
            (int(tx_keys::CHANGES), Value::Text(changes.clone())),
            (int(tx_keys::META), opt_text(meta.as_deref())),
        ]),
        Transaction::Private {
            made_at,
            key_used,
            encrypted_changes,
            meta,
        } => {
            let mut sealed = encrypted_changes.nonce.to_vec();
            sealed.extend_from_slice(&encrypted_changes.ciphertext);
            Value::Map(vec![
                (int(tx_keys::PRIVACY), int(PRIVACY_PRIVATE)),
                (int(tx_keys::MADE_AT), int(*made_at)),
                (int(tx_keys::CHANGES), Value::Bytes(sealed)),
                (int(tx_keys::KEY_USED), Value::Bytes(key_used.0.to_vec())),
                (int(tx_keys::META), opt_text(meta.as_deref())),
            ])
        }
    }
}

/// JSON text with object keys sorted at every level.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_json(&mut out, value);
    out
}

fn write_json(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_json(out, item);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json(out, item);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}

/// Encode a CBOR Value to canonical bytes.
fn encode_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr),
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Tag(tag, inner) => {
            encode_uint(buf, 6, *tag);
            encode_value_to(buf, inner);
        }
        // Never produced by the builders above.
        _ => buf.push(0xf7),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Encode a map with keys sorted by their encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}
