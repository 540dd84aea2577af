// Result Loading
// Capability interface for reading a finished node's metrics

use crate::node::Node;
use crate::params::Value;

use thiserror::Error;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Flat result mapping, keys look like `metrics.<node>.<metric>`
pub type ResultMap = BTreeMap<String, Value>;

/// Errors that can occur while loading a node result
#[derive(Debug, Error)]
pub enum ResultError {
    #[error("node '{0}' does not support result loading")]
    Unsupported(String),

    #[error("node '{0}' has no primary output")]
    NoPrimaryOutput(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads the outputs of a completed job into a flat mapping
pub trait ResultLoader: Send + Sync + fmt::Debug {
    fn load_result(&self, node: &Node, node_dir: &Path) -> Result<ResultMap, ResultError>;
}

/// Closed set of node kinds; custom loading is attached through [`ResultLoader`]
#[derive(Debug, Clone, Default)]
pub enum NodeKind {
    /// Plain process, no result loading
    #[default]
    Process,
    /// Primary output is a JSON document with a `metrics` object
    JsonMetrics,
    /// User-provided loader
    Custom(Arc<dyn ResultLoader>),
}

impl NodeKind {
    pub fn custom(loader: impl ResultLoader + 'static) -> Self {
        NodeKind::Custom(Arc::new(loader))
    }

    pub fn loads_results(&self) -> bool {
        !matches!(self, NodeKind::Process)
    }
}

/// Built-in loader for JSON primary outputs.
///
/// Looks for `result.metrics`, then `metrics`, then falls back to the whole
/// document. Nested objects are flattened with `.` separators.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMetricsLoader;

impl ResultLoader for JsonMetricsLoader {
    fn load_result(&self, node: &Node, node_dir: &Path) -> Result<ResultMap, ResultError> {
        let rel = node
            .primary_out_path()
            .ok_or_else(|| ResultError::NoPrimaryOutput(node.name.clone()))?;
        let path = resolve_in_dir(node_dir, rel);

        let text = fs::read_to_string(&path).map_err(|source| ResultError::Io {
            path: path.clone(),
            source,
        })?;
        let doc: serde_json::Value =
            serde_json::from_str(&text).map_err(|source| ResultError::Json {
                path: path.clone(),
                source,
            })?;

        let metrics = doc
            .pointer("/result/metrics")
            .or_else(|| doc.get("metrics"))
            .unwrap_or(&doc);

        let mut flat = ResultMap::new();
        flatten_into(&format!("metrics.{}", node.name), metrics, &mut flat);
        Ok(flat)
    }
}

/// Resolve a declared output path against a job directory
pub(crate) fn resolve_in_dir(node_dir: &Path, rel: &str) -> PathBuf {
    let path = Path::new(rel);
    if path.is_absolute() {
        path.to_path_buf()
    } else if rel == "." || rel.is_empty() {
        node_dir.to_path_buf()
    } else {
        node_dir.join(path)
    }
}

fn flatten_into(prefix: &str, value: &serde_json::Value, out: &mut ResultMap) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                flatten_into(&format!("{}.{}", prefix, key), child, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), Value::from_json(other));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeBuilder;

    fn evaluate_node() -> Node {
        NodeBuilder::new("evaluate", "python evaluate.py")
            .in_path("pred_fpath")
            .out_path("out_fpath", "metrics.json")
            .primary_out_key("out_fpath")
            .kind(NodeKind::JsonMetrics)
            .build()
            .unwrap()
    }

    #[test]
    fn test_json_metrics_loader_reads_result_metrics() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("metrics.json"),
            r#"{"info": [], "result": {"metrics": {"accuracy": 0.75, "per_class": {"pos": 0.5}}}}"#,
        )
        .unwrap();

        let node = evaluate_node();
        let result = node.load_result(temp.path()).unwrap();

        assert_eq!(
            result.get("metrics.evaluate.accuracy"),
            Some(&Value::Float(0.75))
        );
        assert_eq!(
            result.get("metrics.evaluate.per_class.pos"),
            Some(&Value::Float(0.5))
        );
        assert!(!result.contains_key("metrics.evaluate.info"));
    }

    #[test]
    fn test_json_metrics_loader_top_level_metrics() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("metrics.json"), r#"{"metrics": {"n": 3}}"#).unwrap();

        let result = evaluate_node().load_result(temp.path()).unwrap();
        assert_eq!(result.get("metrics.evaluate.n"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_json_metrics_loader_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let err = evaluate_node().load_result(temp.path()).unwrap_err();
        assert!(matches!(err, ResultError::Io { .. }));
    }

    #[derive(Debug)]
    struct Exists;

    impl ResultLoader for Exists {
        fn load_result(&self, node: &Node, node_dir: &Path) -> Result<ResultMap, ResultError> {
            let mut out = ResultMap::new();
            out.insert(
                format!("metrics.{}.exists", node.name),
                Value::Bool(node_dir.exists()),
            );
            Ok(out)
        }
    }

    #[test]
    fn test_custom_loader() {
        let temp = tempfile::tempdir().unwrap();
        let node = NodeBuilder::new("predict", "python predict.py")
            .out_path("dst", "out.json")
            .kind(NodeKind::custom(Exists))
            .build()
            .unwrap();

        let result = node.load_result(temp.path()).unwrap();
        assert_eq!(result.get("metrics.predict.exists"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_process_kind_is_unsupported() {
        let node = NodeBuilder::new("plain", "true").build().unwrap();
        let err = node.load_result(Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, ResultError::Unsupported(_)));
    }

    #[test]
    fn test_resolve_in_dir() {
        let dir = Path::new("/work/node");
        assert_eq!(resolve_in_dir(dir, "."), PathBuf::from("/work/node"));
        assert_eq!(resolve_in_dir(dir, "a.json"), PathBuf::from("/work/node/a.json"));
        assert_eq!(resolve_in_dir(dir, "/abs/b.json"), PathBuf::from("/abs/b.json"));
    }
}
