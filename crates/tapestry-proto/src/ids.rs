//! Id generation and the `unique_key` canonical-JSON dedup hash.

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a fresh random entity id.
///
/// The original Python rows are keyed by `uuid.uuid4()`; this follows the
/// same convention across every domain entity rather than the teacher's
/// timestamp+hex task id scheme, since the source of truth here is the
/// original implementation's row ids, not Ralph's task ids.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Computes the `unique_key` for a thread: `"{interaction_type}:{16-hex}"`
/// where the hex suffix is the first 16 hex characters of a SHA-256 over
/// the payload's canonical JSON (sorted keys, no whitespace, UTF-8,
/// non-ASCII left unescaped).
pub fn unique_key(interaction_type: &str, payload: &Value) -> String {
    let canonical = canonical_json(payload);
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{interaction_type}:{}", &hex[..16])
}

/// Recursively sorts object keys and serializes without whitespace,
/// matching `json.dumps(normalized, separators=(",", ":"), ensure_ascii=False)`.
fn canonical_json(value: &Value) -> String {
    let normalized = normalize(value);
    serde_json::to_string(&normalized).expect("canonical json values always serialize")
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), normalize(v))).collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}
