// Parameter Groups
// The four typed parameter groups carried by every node

use crate::params::value::Value;

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;

/// The group a parameter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamGroup {
    /// External input file or directory, bound literally or by a connection
    InPath,
    /// Location the node writes to, relative to its job directory
    OutPath,
    /// Affects computed results and participates in the cache key
    AlgoParam,
    /// Execution-only knob, excluded from the cache key
    PerfParam,
}

impl fmt::Display for ParamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamGroup::InPath => "in_path",
            ParamGroup::OutPath => "out_path",
            ParamGroup::AlgoParam => "algo_param",
            ParamGroup::PerfParam => "perf_param",
        };
        f.write_str(name)
    }
}

/// Ordered parameter maps for one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGroups {
    /// Input paths; `None` means not yet bound
    pub in_paths: BTreeMap<String, Option<Value>>,
    /// Output paths relative to the job directory (absolute paths are kept)
    pub out_paths: BTreeMap<String, String>,
    pub algo_params: BTreeMap<String, Value>,
    pub perf_params: BTreeMap<String, Value>,
}

impl ParamGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find which group declares `name`
    pub fn group_of(&self, name: &str) -> Option<ParamGroup> {
        if self.in_paths.contains_key(name) {
            Some(ParamGroup::InPath)
        } else if self.out_paths.contains_key(name) {
            Some(ParamGroup::OutPath)
        } else if self.algo_params.contains_key(name) {
            Some(ParamGroup::AlgoParam)
        } else if self.perf_params.contains_key(name) {
            Some(ParamGroup::PerfParam)
        } else {
            None
        }
    }

    /// Overwrite the value of an already-declared parameter.
    ///
    /// Returns the group that was updated, or `None` when no group declares
    /// the name.
    pub fn set(&mut self, name: &str, value: Value) -> Option<ParamGroup> {
        let group = self.group_of(name)?;
        match group {
            ParamGroup::InPath => {
                self.in_paths
                    .insert(name.to_string(), value.into_path_binding());
            }
            ParamGroup::OutPath => {
                self.out_paths.insert(name.to_string(), value.as_arg());
            }
            ParamGroup::AlgoParam => {
                self.algo_params.insert(name.to_string(), value);
            }
            ParamGroup::PerfParam => {
                self.perf_params.insert(name.to_string(), value);
            }
        }
        Some(group)
    }

    /// Names declared in more than one group
    pub fn overlapping_names(&self) -> Vec<String> {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        let names = self
            .in_paths
            .keys()
            .chain(self.out_paths.keys())
            .chain(self.algo_params.keys())
            .chain(self.perf_params.keys());
        for name in names {
            *seen.entry(name.as_str()).or_insert(0) += 1;
        }
        seen.into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Input paths that have neither a default nor a bound value
    pub fn unbound_in_paths(&self) -> impl Iterator<Item = &str> {
        self.in_paths
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name.as_str())
    }
}

/// Non-fatal notice that an input still needs a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingWarning {
    pub node: Option<String>,
    pub param: String,
    pub message: String,
}

impl BindingWarning {
    pub fn unbound_in_path(node: Option<&str>, param: impl Into<String>) -> Self {
        let param = param.into();
        let message = format!(
            "in_path \"{}\" has no default; it must be wired from an upstream output or given a value before scheduling",
            param
        );
        Self {
            node: node.map(str::to_string),
            param,
            message,
        }
    }
}

impl fmt::Display for BindingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "node '{}': {}", node, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_respects_group() {
        let mut groups = ParamGroups::new();
        groups.in_paths.insert("src".into(), None);
        groups.out_paths.insert("dst".into(), "out.json".into());
        groups.algo_params.insert("k".into(), Value::Int(1));

        assert_eq!(groups.set("src", "a.txt".into()), Some(ParamGroup::InPath));
        assert_eq!(groups.in_paths["src"], Some(Value::from("a.txt")));

        assert_eq!(groups.set("dst", "other.json".into()), Some(ParamGroup::OutPath));
        assert_eq!(groups.out_paths["dst"], "other.json");

        assert_eq!(groups.set("missing", Value::Int(3)), None);
    }

    #[test]
    fn test_blank_in_path_unbinds() {
        let mut groups = ParamGroups::new();
        groups.in_paths.insert("src".into(), Some(Value::from("a.txt")));

        groups.set("src", "  ".into());
        assert_eq!(groups.in_paths["src"], None);
        assert_eq!(groups.unbound_in_paths().collect::<Vec<_>>(), vec!["src"]);
    }

    #[test]
    fn test_overlapping_names() {
        let mut groups = ParamGroups::new();
        groups.algo_params.insert("x".into(), Value::Int(1));
        groups.perf_params.insert("x".into(), Value::Int(2));
        groups.perf_params.insert("workers".into(), Value::Int(2));
        assert_eq!(groups.overlapping_names(), vec!["x".to_string()]);
    }

    #[test]
    fn test_warning_names_param() {
        let warning = BindingWarning::unbound_in_path(Some("demo"), "src");
        assert!(warning.to_string().contains("in_path \"src\""));
        assert!(warning.to_string().starts_with("node 'demo'"));
    }
}
