// Node Module
// A unit of external computation: command template, parameter groups and ports

pub mod ports;
pub mod resources;
pub mod result;

pub use ports::{PortDirection, PortRef};
pub use resources::ResourceHints;
pub use result::{JsonMetricsLoader, NodeKind, ResultError, ResultLoader, ResultMap};

use crate::params::{
    derive_groups, BindingWarning, FieldSpec, ParamError, ParamGroup, ParamGroups, Value,
};

use std::path::Path;

/// A declared unit of external computation
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique within a pipeline; prefixes matrix keys and metrics
    pub name: String,
    /// Command template, may contain `{param}` placeholders
    pub executable: String,
    pub groups: ParamGroups,
    pub primary_out_key: Option<String>,
    pub resources: ResourceHints,
    pub kind: NodeKind,
}

impl Node {
    /// Build a node from a tagged schema
    pub fn from_schema(
        name: impl Into<String>,
        executable: impl Into<String>,
        fields: &[FieldSpec],
    ) -> Result<Self, ParamError> {
        let name = name.into();
        let derived = derive_groups(fields)?;

        for warning in &derived.warnings {
            tracing::warn!(node = %name, param = %warning.param, "{}", warning.message);
        }

        Ok(Self {
            name,
            executable: executable.into(),
            groups: derived.groups,
            primary_out_key: derived.primary_out_key,
            resources: ResourceHints::default(),
            kind: NodeKind::default(),
        })
    }

    /// Override the default path of a declared output
    pub fn with_out_path(
        mut self,
        key: impl AsRef<str>,
        path: impl Into<String>,
    ) -> Result<Self, ParamError> {
        let key = key.as_ref();
        match self.groups.out_paths.get_mut(key) {
            Some(slot) => {
                *slot = path.into();
                Ok(self)
            }
            None => Err(ParamError::UnknownParam {
                node: self.name.clone(),
                param: key.to_string(),
            }),
        }
    }

    pub fn with_resources(mut self, resources: ResourceHints) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Input port for an `in_paths` key
    pub fn input(&self, key: impl Into<String>) -> PortRef {
        PortRef::input(self.name.clone(), key)
    }

    /// Output port for an `out_paths` key
    pub fn output(&self, key: impl Into<String>) -> PortRef {
        PortRef::output(self.name.clone(), key)
    }

    /// Output port of the primary artifact
    pub fn primary_output(&self) -> Option<PortRef> {
        self.primary_out_key
            .as_ref()
            .map(|key| PortRef::output(self.name.clone(), key.clone()))
    }

    /// Declared relative path of the primary artifact
    pub fn primary_out_path(&self) -> Option<&str> {
        let key = self.primary_out_key.as_ref()?;
        self.groups.out_paths.get(key).map(String::as_str)
    }

    pub fn has_port(&self, port: &PortRef) -> bool {
        match port.direction {
            PortDirection::Input => self.groups.in_paths.contains_key(&port.key),
            PortDirection::Output => self.groups.out_paths.contains_key(&port.key),
        }
    }

    /// Inputs that still need a literal value or a connection
    pub fn warnings(&self) -> Vec<BindingWarning> {
        self.groups
            .unbound_in_paths()
            .map(|param| BindingWarning::unbound_in_path(Some(self.name.as_str()), param))
            .collect()
    }

    /// Set a declared parameter in whichever group owns it
    pub fn set_param(&mut self, param: &str, value: Value) -> Result<ParamGroup, ParamError> {
        self.groups
            .set(param, value)
            .ok_or_else(|| ParamError::UnknownParam {
                node: self.name.clone(),
                param: param.to_string(),
            })
    }

    /// Read the finished outputs in `node_dir` through this node's loader
    pub fn load_result(&self, node_dir: &Path) -> Result<ResultMap, ResultError> {
        match &self.kind {
            NodeKind::Process => Err(ResultError::Unsupported(self.name.clone())),
            NodeKind::JsonMetrics => JsonMetricsLoader.load_result(self, node_dir),
            NodeKind::Custom(loader) => loader.load_result(self, node_dir),
        }
    }
}

/// Explicit construction of a [`Node`], group by group
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    name: String,
    executable: String,
    groups: ParamGroups,
    primary_out_key: Option<String>,
    resources: ResourceHints,
    kind: NodeKind,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            groups: ParamGroups::new(),
            primary_out_key: None,
            resources: ResourceHints::default(),
            kind: NodeKind::default(),
        }
    }

    /// Declare an input with no default
    pub fn in_path(mut self, key: impl Into<String>) -> Self {
        self.groups.in_paths.insert(key.into(), None);
        self
    }

    pub fn in_path_default(mut self, key: impl Into<String>, default: impl Into<Value>) -> Self {
        self.groups
            .in_paths
            .insert(key.into(), default.into().into_path_binding());
        self
    }

    pub fn out_path(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.groups.out_paths.insert(key.into(), path.into());
        self
    }

    pub fn primary_out_key(mut self, key: impl Into<String>) -> Self {
        self.primary_out_key = Some(key.into());
        self
    }

    pub fn algo_param(mut self, key: impl Into<String>, default: impl Into<Value>) -> Self {
        self.groups.algo_params.insert(key.into(), default.into());
        self
    }

    pub fn perf_param(mut self, key: impl Into<String>, default: impl Into<Value>) -> Self {
        self.groups.perf_params.insert(key.into(), default.into());
        self
    }

    pub fn resources(mut self, resources: ResourceHints) -> Self {
        self.resources = resources;
        self
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Validate the declaration and produce the node.
    ///
    /// A name may appear in one group only. With a single output and no
    /// primary declared, that output becomes the primary.
    pub fn build(self) -> Result<Node, ParamError> {
        let overlapping = self.groups.overlapping_names();
        if let Some(field) = overlapping.into_iter().next() {
            let tags: Vec<String> = [
                (self.groups.in_paths.contains_key(&field), ParamGroup::InPath),
                (self.groups.out_paths.contains_key(&field), ParamGroup::OutPath),
                (self.groups.algo_params.contains_key(&field), ParamGroup::AlgoParam),
                (self.groups.perf_params.contains_key(&field), ParamGroup::PerfParam),
            ]
            .iter()
            .filter(|(present, _)| *present)
            .map(|(_, group)| group.to_string())
            .collect();
            return Err(ParamError::ConflictingTags {
                field,
                tags: tags.join(", "),
            });
        }

        let primary_out_key = match self.primary_out_key {
            Some(key) if self.groups.out_paths.contains_key(&key) => Some(key),
            Some(key) => {
                return Err(ParamError::Config(format!(
                    "node '{}' declares primary output '{}' which is not an out_path",
                    self.name, key
                )))
            }
            None if self.groups.out_paths.len() == 1 => self.groups.out_paths.keys().next().cloned(),
            None if self.groups.out_paths.is_empty() => None,
            None => {
                return Err(ParamError::Config(format!(
                    "node '{}' has {} out_paths but no primary_out_key",
                    self.name,
                    self.groups.out_paths.len()
                )))
            }
        };

        let node = Node {
            name: self.name,
            executable: self.executable,
            groups: self.groups,
            primary_out_key,
            resources: self.resources,
            kind: self.kind,
        };

        for warning in node.warnings() {
            tracing::warn!(node = %node.name, param = %warning.param, "{}", warning.message);
        }

        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::FieldTag;

    fn schema_node() -> Node {
        let fields = vec![
            FieldSpec::new("src", Value::Null).tag(FieldTag::InPath),
            FieldSpec::new("dst", "schema.txt").tag(FieldTag::Primary),
            FieldSpec::new("foo", 1),
            FieldSpec::new("workers", 0).tag(FieldTag::PerfParam),
        ];
        Node::from_schema("demo", "python -m demo", &fields).unwrap()
    }

    fn explicit_node() -> Node {
        NodeBuilder::new("demo", "python -m demo")
            .in_path("src")
            .out_path("dst", "schema.txt")
            .primary_out_key("dst")
            .algo_param("foo", 1)
            .perf_param("workers", 0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_schema_and_explicit_construction_agree() {
        let schema = schema_node();
        let explicit = explicit_node();

        assert_eq!(schema.groups, explicit.groups);
        assert_eq!(schema.primary_out_key, explicit.primary_out_key);
        assert_eq!(schema.warnings(), explicit.warnings());
    }

    #[test]
    fn test_out_path_override() {
        let node = schema_node().with_out_path("dst", "override.txt").unwrap();
        assert_eq!(node.groups.out_paths["dst"], "override.txt");
        assert_eq!(node.primary_out_path(), Some("override.txt"));

        let err = schema_node().with_out_path("nope", "x").unwrap_err();
        assert_eq!(
            err,
            ParamError::UnknownParam {
                node: "demo".to_string(),
                param: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_single_output_becomes_primary() {
        let node = NodeBuilder::new("predict", "predict")
            .out_path("pred", "pred.json")
            .build()
            .unwrap();
        assert_eq!(node.primary_out_key.as_deref(), Some("pred"));
        assert_eq!(node.primary_output(), Some(PortRef::output("predict", "pred")));
    }

    #[test]
    fn test_ambiguous_primary_is_error() {
        let result = NodeBuilder::new("predict", "predict")
            .out_path("a", "a.json")
            .out_path("b", "b.json")
            .build();
        assert!(matches!(result, Err(ParamError::Config(_))));

        let result = NodeBuilder::new("predict", "predict")
            .out_path("a", "a.json")
            .primary_out_key("b")
            .build();
        assert!(matches!(result, Err(ParamError::Config(_))));
    }

    #[test]
    fn test_overlapping_groups_conflict() {
        let err = NodeBuilder::new("n", "run")
            .in_path("x")
            .out_path("x", "x.txt")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ParamError::ConflictingTags {
                field: "x".to_string(),
                tags: "in_path, out_path".to_string()
            }
        );
    }

    #[test]
    fn test_ports_and_warnings() {
        let node = explicit_node();
        assert!(node.has_port(&node.input("src")));
        assert!(node.has_port(&node.output("dst")));
        assert!(!node.has_port(&node.output("src")));

        let warnings = node.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].node.as_deref(), Some("demo"));
        assert!(warnings[0].to_string().contains("in_path \"src\""));
    }

    #[test]
    fn test_set_param() {
        let mut node = explicit_node();
        assert_eq!(
            node.set_param("foo", Value::Int(5)).unwrap(),
            ParamGroup::AlgoParam
        );
        assert_eq!(node.groups.algo_params["foo"], Value::Int(5));
        assert!(node.set_param("missing", Value::Null).is_err());
    }
}
