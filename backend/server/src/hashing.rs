//! Deterministic record hashing for anchored events.
//!
//! A payload is canonicalised as a recursively key-sorted JSON value with
//! compact separators, serialised to UTF-8 and digested with SHA-256.  The
//! digest is hex-encoded with a `0x` prefix.  Numeric fields enter the
//! payload as fixed-precision decimal strings so the bytes are reproducible
//! by independent verifiers.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Sort a JSON value's object keys recursively.  Arrays keep their order.
fn sort_json_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), sort_json_value(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_json_value).collect()),
        _ => value.clone(),
    }
}

/// Canonical compact serialisation of a payload.
pub fn canonical_json(value: &Value) -> String {
    // serde_json emits compact separators by default; sorting makes the
    // byte sequence independent of construction order.
    serde_json::to_string(&sort_json_value(value)).unwrap_or_default()
}

/// SHA-256 over the canonical form, `0x`-prefixed lowercase hex.
pub fn record_hash(value: &Value) -> String {
    let canonical = canonical_json(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Bare-hex SHA-256 of a raw field value.  Used to keep PII out of
/// anchored payloads while still committing to it.
pub fn field_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Render a scaled integer as a fixed-precision decimal string:
/// `format_fixed(12500, 3)` → `"12.500"`, `format_fixed(-1050000, 6)` →
/// `"-1.050000"`.  `scale = 0` renders the plain integer.
pub fn format_fixed(value: i64, scale: u32) -> String {
    if scale == 0 {
        return value.to_string();
    }
    let divisor = 10_i64.pow(scale);
    let sign = if value < 0 { "-" } else { "" };
    let magnitude = value.unsigned_abs();
    let whole = magnitude / divisor as u64;
    let frac = magnitude % divisor as u64;
    format!("{sign}{whole}.{frac:0width$}", width = scale as usize)
}

/// Approval payload committed on-chain when a lot is approved.
pub fn product_approval_payload(
    pid: &str,
    title: &str,
    quantity_milli: i64,
    origin_lat_micro: i64,
    origin_lng_micro: i64,
    approved_at: &str,
) -> Value {
    json!({
        "pid": pid,
        "title": title,
        "quantity": format_fixed(quantity_milli, 3),
        "origin": [
            format_fixed(origin_lat_micro, 6),
            format_fixed(origin_lng_micro, 6),
        ],
        "approved_at": approved_at,
    })
}

/// Registration payload committed on-chain when a farmer signs up.
/// Identity fields are hashed individually; only coordinates and SACCO
/// membership travel in the clear.
pub fn farmer_registration_payload(
    uid: &str,
    full_name: &str,
    national_id: &str,
    phone: &str,
    gps_lat_micro: Option<i64>,
    gps_lng_micro: Option<i64>,
    sacco_membership: &str,
    sacco_name: &str,
) -> Value {
    json!({
        "uid": uid,
        "full_name_hash": field_hash(full_name),
        "national_id_hash": field_hash(national_id),
        "phone_hash": field_hash(phone),
        "gps": [
            gps_lat_micro.map(|v| format_fixed(v, 6)).unwrap_or_default(),
            gps_lng_micro.map(|v| format_fixed(v, 6)).unwrap_or_default(),
        ],
        "sacco": {
            "membership": sacco_membership,
            "name": sacco_name,
        },
    })
}
