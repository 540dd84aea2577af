// Cache Keys
// Content hash over a job's result-relevant parameters and upstream lineage

use crate::params::Value;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use std::collections::BTreeMap;
use std::fmt;

/// Number of hex characters kept from the digest
pub const KEY_LEN: usize = 16;

/// Upstream job feeding one input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLineage {
    pub node: String,
    pub port: String,
    pub key: CacheKey,
}

/// Short deterministic identifier of a job's concrete binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash a node binding.
    ///
    /// Only the node name, algorithm parameters, literal input values and
    /// upstream keys contribute. Performance parameters never do.
    pub fn compute(
        node: &str,
        algo_params: &BTreeMap<String, Value>,
        external_inputs: &BTreeMap<String, Value>,
        upstream: &BTreeMap<String, InputLineage>,
    ) -> Self {
        let payload = canonical_payload(node, algo_params, external_inputs, upstream);
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        let digest = hex::encode(hasher.finalize());
        CacheKey(digest[..KEY_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name for this key under the node directory
    pub fn dir_name(&self, node: &str) -> String {
        format!("{}_id_{}", node, self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sorted-key compact JSON of everything that identifies a result
fn canonical_payload(
    node: &str,
    algo_params: &BTreeMap<String, Value>,
    external_inputs: &BTreeMap<String, Value>,
    upstream: &BTreeMap<String, InputLineage>,
) -> String {
    let canonical_map = |map: &BTreeMap<String, Value>| {
        serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), v.canonical()))
                .collect(),
        )
    };

    let lineage: serde_json::Map<String, serde_json::Value> = upstream
        .iter()
        .map(|(port, src)| {
            (
                port.clone(),
                serde_json::json!({
                    "node": src.node,
                    "port": src.port,
                    "key": src.key.as_str(),
                }),
            )
        })
        .collect();

    serde_json::json!({
        "node": node,
        "algo_params": canonical_map(algo_params),
        "in_paths": canonical_map(external_inputs),
        "upstream": lineage,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn key(algo: &[(&str, Value)]) -> CacheKey {
        CacheKey::compute("predict", &params(algo), &BTreeMap::new(), &BTreeMap::new())
    }

    #[test]
    fn test_key_is_stable_and_short() {
        let a = key(&[("alpha", Value::Float(0.5)), ("k", Value::Int(3))]);
        let b = key(&[("k", Value::Int(3)), ("alpha", Value::Float(0.5))]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), KEY_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_numeric_normalization() {
        assert_eq!(key(&[("k", Value::Int(1))]), key(&[("k", Value::Float(1.0))]));
        assert_ne!(key(&[("k", Value::Int(1))]), key(&[("k", Value::from("1"))]));
    }

    #[test]
    fn test_any_algo_change_changes_key() {
        let base = key(&[("k", Value::Int(1)), ("mode", Value::from("fast"))]);
        assert_ne!(base, key(&[("k", Value::Int(2)), ("mode", Value::from("fast"))]));
        assert_ne!(base, key(&[("k", Value::Int(1)), ("mode", Value::from("slow"))]));
        assert_ne!(
            base,
            CacheKey::compute(
                "other",
                &params(&[("k", Value::Int(1)), ("mode", Value::from("fast"))]),
                &BTreeMap::new(),
                &BTreeMap::new()
            )
        );
    }

    #[test]
    fn test_lineage_changes_key() {
        let algo = params(&[("k", Value::Int(1))]);
        let lineage = |upstream_key: &str| {
            let mut map = BTreeMap::new();
            map.insert(
                "src".to_string(),
                InputLineage {
                    node: "prep".to_string(),
                    port: "dst".to_string(),
                    key: CacheKey(upstream_key.to_string()),
                },
            );
            map
        };

        let a = CacheKey::compute("eval", &algo, &BTreeMap::new(), &lineage("aaaa"));
        let b = CacheKey::compute("eval", &algo, &BTreeMap::new(), &lineage("bbbb"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_dir_name() {
        let key = CacheKey("0123456789abcdef".to_string());
        assert_eq!(key.dir_name("predict"), "predict_id_0123456789abcdef");
    }
}
