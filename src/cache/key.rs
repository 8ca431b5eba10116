//! Cache Key Derivation
//!
//! Cache keys are SHA-256 digests over a canonical rendering of the request.
//! Canonicalization sorts object keys recursively, so two requests whose
//! contexts differ only in key insertion order hash identically. The digest
//! is stable across processes, which lets the shared sqlite tier survive
//! restarts.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::TaskRequest;

/// Derive the cache key for a task request
pub fn request_key(request: &TaskRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"promptgate/v1\n");
    hasher.update(request.task_type.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(&Value::Object(request.context.clone())).as_bytes());
    if let Some(limit) = request.limit {
        hasher.update(b"\nlimit=");
        hasher.update(limit.to_string().as_bytes());
    }
    hex_digest(hasher)
}

/// Derive a namespaced key for arbitrary payloads
pub fn namespaced_key(namespace: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(payload).as_bytes());
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Render JSON with object keys sorted recursively
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

/// Canonicalize a context map (exposed for tests and diagnostics)
pub fn canonical_context(context: &Map<String, Value>) -> String {
    canonical_json(&Value::Object(context.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskType;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_key_is_hex_sha256() {
        let request = TaskRequest::new(TaskType::Analysis).with_context("q", json!("x"));
        let key = request_key(&request);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_independent_of_insertion_order() {
        let a = TaskRequest::new(TaskType::Analysis)
            .with_context("alpha", json!(1))
            .with_context("beta", json!(2));
        let b = TaskRequest::new(TaskType::Analysis)
            .with_context("beta", json!(2))
            .with_context("alpha", json!(1));
        assert_eq!(request_key(&a), request_key(&b));
    }

    #[test]
    fn test_key_varies_with_task_type() {
        let a = TaskRequest::new(TaskType::Analysis).with_context("q", json!("x"));
        let b = TaskRequest::new(TaskType::Suggestion).with_context("q", json!("x"));
        assert_ne!(request_key(&a), request_key(&b));
    }

    #[test]
    fn test_key_varies_with_limit() {
        let base = TaskRequest::new(TaskType::SimilaritySearch).with_context("q", json!("x"));
        let limited = base.clone().with_limit(5);
        assert_ne!(request_key(&base), request_key(&limited));
    }

    #[test]
    fn test_nested_objects_sorted() {
        let a = json!({"outer": {"b": 2, "a": 1}});
        let b = json!({"outer": {"a": 1, "b": 2}});
        assert_eq!(
            namespaced_key("test", &a),
            namespaced_key("test", &b)
        );
    }

    proptest! {
        #[test]
        fn prop_key_order_independent(
            entries in proptest::collection::hash_map("[a-z]{1,8}", 0i64..1000, 1..8)
        ) {
            // Distinct keys by construction; only insertion order varies
            let pairs: Vec<(String, i64)> = entries.into_iter().collect();

            let mut forward = TaskRequest::new(TaskType::Analysis);
            for (k, v) in &pairs {
                forward = forward.with_context(k.clone(), json!(v));
            }

            let mut reversed = TaskRequest::new(TaskType::Analysis);
            for (k, v) in pairs.iter().rev() {
                reversed = reversed.with_context(k.clone(), json!(v));
            }

            prop_assert_eq!(request_key(&forward), request_key(&reversed));
        }
    }
}
