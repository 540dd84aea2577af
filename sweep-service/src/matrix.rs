// Parameter Matrix Expansion
// Expands "node.param" sweeps into concrete pipeline instances

use crate::params::{ParamError, Value};
use crate::pipeline::Pipeline;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::{BTreeMap, BTreeSet};

/// One concrete assignment of matrix keys to values
pub type Binding = BTreeMap<String, Value>;

/// Errors raised while expanding a matrix
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("co-varying keys [{keys}] have different lengths ({lengths})")]
    ShapeMismatch { keys: String, lengths: String },

    #[error("matrix key '{0}' must look like <node>.<param>")]
    InvalidKey(String),

    #[error("matrix key '{key}' names unknown node '{node}'")]
    UnknownNode { key: String, node: String },

    #[error("matrix key '{key}': node '{node}' has no parameter '{param}'")]
    UnknownParam {
        key: String,
        node: String,
        param: String,
    },

    #[error("zip group names '{0}' which is not a matrix key")]
    UnknownZipKey(String),

    #[error("matrix key '{0}' appears in more than one zip group")]
    DuplicateZipKey(String),

    #[error("matrix key '{0}' has no candidate values")]
    EmptyValues(String),
}

/// Candidate values for one key; a scalar is a single candidate
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum AxisValues {
    Many(Vec<Value>),
    One(Value),
}

impl From<AxisValues> for Vec<Value> {
    fn from(values: AxisValues) -> Self {
        match values {
            AxisValues::Many(values) => values,
            AxisValues::One(value) => vec![value],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawGrid {
    #[serde(default)]
    zip: Vec<Vec<String>>,
    #[serde(flatten)]
    axes: BTreeMap<String, AxisValues>,
}

/// A single sweep grid: independent axes plus co-varying groups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawGrid")]
pub struct MatrixGrid {
    /// `"node.param"` -> ordered candidate values
    #[serde(flatten)]
    pub axes: BTreeMap<String, Vec<Value>>,
    /// Groups of keys whose values advance together
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zip: Vec<Vec<String>>,
}

impl From<RawGrid> for MatrixGrid {
    fn from(raw: RawGrid) -> Self {
        Self {
            axes: raw
                .axes
                .into_iter()
                .map(|(key, values)| (key, values.into()))
                .collect(),
            zip: raw.zip,
        }
    }
}

impl MatrixGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an independent axis
    pub fn axis(mut self, key: impl Into<String>, values: Vec<Value>) -> Self {
        self.axes.insert(key.into(), values);
        self
    }

    /// Declare keys that co-vary
    pub fn zip<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zip.push(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Group keys into axes, each axis sorted and axes ordered by first key
    fn axes_groups(&self) -> Result<Vec<Vec<&str>>, MatrixError> {
        let mut zipped: BTreeSet<&str> = BTreeSet::new();
        let mut groups: Vec<Vec<&str>> = Vec::new();

        for group in &self.zip {
            let mut keys: Vec<&str> = Vec::with_capacity(group.len());
            for key in group {
                if !self.axes.contains_key(key) {
                    return Err(MatrixError::UnknownZipKey(key.clone()));
                }
                if !zipped.insert(key) {
                    return Err(MatrixError::DuplicateZipKey(key.clone()));
                }
                keys.push(key);
            }
            keys.sort_unstable();
            if !keys.is_empty() {
                groups.push(keys);
            }
        }

        for key in self.axes.keys() {
            if !zipped.contains(key.as_str()) {
                groups.push(vec![key.as_str()]);
            }
        }

        groups.sort_by(|a, b| a[0].cmp(b[0]));
        Ok(groups)
    }

    /// Expand into bindings; the last axis varies fastest
    pub fn expand(&self) -> Result<Vec<Binding>, MatrixError> {
        for (key, values) in &self.axes {
            if values.is_empty() {
                return Err(MatrixError::EmptyValues(key.clone()));
            }
        }

        let mut bindings: Vec<Binding> = vec![Binding::new()];

        for axis in self.axes_groups()? {
            let lengths: Vec<usize> = axis.iter().map(|key| self.axes[*key].len()).collect();
            if lengths.windows(2).any(|pair| pair[0] != pair[1]) {
                return Err(MatrixError::ShapeMismatch {
                    keys: axis.join(", "),
                    lengths: lengths
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }

            let mut next = Vec::with_capacity(bindings.len() * lengths[0]);
            for binding in &bindings {
                for idx in 0..lengths[0] {
                    let mut extended = binding.clone();
                    for key in &axis {
                        extended.insert(key.to_string(), self.axes[*key][idx].clone());
                    }
                    next.push(extended);
                }
            }
            bindings = next;
        }

        Ok(bindings)
    }
}

/// A sweep specification: one grid or the union of several
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "GridOrGrids", into = "Vec<MatrixGrid>")]
pub struct ParamMatrix {
    pub grids: Vec<MatrixGrid>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GridOrGrids {
    Many(Vec<MatrixGrid>),
    One(MatrixGrid),
}

impl From<GridOrGrids> for ParamMatrix {
    fn from(value: GridOrGrids) -> Self {
        match value {
            GridOrGrids::Many(grids) => Self { grids },
            GridOrGrids::One(grid) => Self { grids: vec![grid] },
        }
    }
}

impl From<ParamMatrix> for Vec<MatrixGrid> {
    fn from(matrix: ParamMatrix) -> Self {
        matrix.grids
    }
}

impl From<MatrixGrid> for ParamMatrix {
    fn from(grid: MatrixGrid) -> Self {
        Self { grids: vec![grid] }
    }
}

impl ParamMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.iter().all(|grid| grid.axes.is_empty())
    }

    /// Every key mentioned by any grid
    pub fn keys(&self) -> BTreeSet<&str> {
        self.grids
            .iter()
            .flat_map(|grid| grid.axes.keys().map(String::as_str))
            .collect()
    }

    /// Expand all grids in order, dropping repeated bindings.
    ///
    /// An empty matrix yields one empty binding.
    pub fn expand(&self) -> Result<Vec<Binding>, MatrixError> {
        if self.grids.is_empty() {
            return Ok(vec![Binding::new()]);
        }

        let mut bindings: Vec<Binding> = Vec::new();
        for grid in &self.grids {
            for binding in grid.expand()? {
                if !bindings.contains(&binding) {
                    bindings.push(binding);
                }
            }
        }
        Ok(bindings)
    }
}

/// A pipeline with one matrix binding applied
#[derive(Debug, Clone)]
pub struct MatrixInstance {
    /// Human readable summary of the binding
    pub name: String,
    pub binding: Binding,
    pub pipeline: Pipeline,
}

/// Applies parameter matrices to pipelines
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a matrix over a pipeline into concrete instances
    pub fn expand(
        pipeline: &Pipeline,
        matrix: &ParamMatrix,
    ) -> Result<Vec<MatrixInstance>, MatrixError> {
        for key in matrix.keys() {
            let (node, param) = split_key(key)?;
            let target = pipeline.node(node).ok_or_else(|| MatrixError::UnknownNode {
                key: key.to_string(),
                node: node.to_string(),
            })?;
            if target.groups.group_of(param).is_none() {
                return Err(MatrixError::UnknownParam {
                    key: key.to_string(),
                    node: node.to_string(),
                    param: param.to_string(),
                });
            }
        }

        let bindings = matrix.expand()?;
        tracing::debug!(count = bindings.len(), "expanded parameter matrix");

        bindings
            .into_iter()
            .map(|binding| Self::apply(pipeline, binding))
            .collect()
    }

    /// Apply one binding to a copy of `pipeline`
    pub fn apply(pipeline: &Pipeline, binding: Binding) -> Result<MatrixInstance, MatrixError> {
        let mut instance = pipeline.clone();

        for (key, value) in &binding {
            let (node, param) = split_key(key)?;
            instance
                .set_param(node, param, value.clone())
                .map_err(|err| match err {
                    ParamError::UnknownParam { node, param } if pipeline.node(&node).is_some() => {
                        MatrixError::UnknownParam {
                            key: key.clone(),
                            node,
                            param,
                        }
                    }
                    _ => MatrixError::UnknownNode {
                        key: key.clone(),
                        node: node.to_string(),
                    },
                })?;
        }

        Ok(MatrixInstance {
            name: instance_name(&binding),
            binding,
            pipeline: instance,
        })
    }
}

fn split_key(key: &str) -> Result<(&str, &str), MatrixError> {
    match key.split_once('.') {
        Some((node, param)) if !node.is_empty() && !param.is_empty() => Ok((node, param)),
        _ => Err(MatrixError::InvalidKey(key.to_string())),
    }
}

fn instance_name(binding: &Binding) -> String {
    if binding.is_empty() {
        return "default".to_string();
    }
    binding
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeBuilder;

    fn values<T: Into<Value>>(items: Vec<T>) -> Vec<Value> {
        items.into_iter().map(Into::into).collect()
    }

    fn pair(binding: &Binding) -> (Value, Value) {
        (binding["n.a"].clone(), binding["n.b"].clone())
    }

    #[test]
    fn test_cross_product() {
        let grid = MatrixGrid::new()
            .axis("n.a", values(vec![1, 2]))
            .axis("n.b", values(vec!["x", "y"]));

        let bindings = grid.expand().unwrap();
        let pairs: Vec<_> = bindings.iter().map(pair).collect();
        assert_eq!(
            pairs,
            vec![
                (Value::Int(1), Value::from("x")),
                (Value::Int(1), Value::from("y")),
                (Value::Int(2), Value::from("x")),
                (Value::Int(2), Value::from("y")),
            ]
        );
    }

    #[test]
    fn test_zip() {
        let grid = MatrixGrid::new()
            .axis("n.a", values(vec![1, 2]))
            .axis("n.b", values(vec!["x", "y"]))
            .zip(["n.a", "n.b"]);

        let pairs: Vec<_> = grid.expand().unwrap().iter().map(pair).collect();
        assert_eq!(
            pairs,
            vec![
                (Value::Int(1), Value::from("x")),
                (Value::Int(2), Value::from("y")),
            ]
        );
    }

    #[test]
    fn test_zip_shape_mismatch_names_keys() {
        let grid = MatrixGrid::new()
            .axis("n.a", values(vec![1, 2, 3]))
            .axis("n.b", values(vec!["x", "y"]))
            .zip(["n.b", "n.a"]);

        let err = grid.expand().unwrap_err();
        assert_eq!(
            err,
            MatrixError::ShapeMismatch {
                keys: "n.a, n.b".to_string(),
                lengths: "3, 2".to_string(),
            }
        );
    }

    #[test]
    fn test_equal_lengths_do_not_zip_implicitly() {
        let grid = MatrixGrid::new()
            .axis("n.a", values(vec![1, 2]))
            .axis("n.b", values(vec![3, 4]));
        assert_eq!(grid.expand().unwrap().len(), 4);
    }

    #[test]
    fn test_zip_errors() {
        let grid = MatrixGrid::new().axis("n.a", values(vec![1])).zip(["n.z"]);
        assert_eq!(
            grid.expand().unwrap_err(),
            MatrixError::UnknownZipKey("n.z".to_string())
        );

        let grid = MatrixGrid::new().axis("n.a", Vec::new());
        assert_eq!(
            grid.expand().unwrap_err(),
            MatrixError::EmptyValues("n.a".to_string())
        );
    }

    #[test]
    fn test_grid_union_deduplicates() {
        let yaml = r#"
- n.a: [1, 2]
- n.a: [2, 3]
"#;
        let matrix: ParamMatrix = serde_yaml::from_str(yaml).unwrap();
        let bindings = matrix.expand().unwrap();
        let values: Vec<_> = bindings.iter().map(|b| b["n.a"].clone()).collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_yaml_grid_with_zip_and_scalar() {
        let yaml = r#"
predict.model: [small, large]
predict.weights: [s.pt, l.pt]
predict.workers: 4
zip:
  - [predict.model, predict.weights]
"#;
        let matrix: ParamMatrix = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(matrix.grids.len(), 1);
        assert_eq!(matrix.grids[0].axes["predict.workers"], vec![Value::Int(4)]);

        let bindings = matrix.expand().unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1]["predict.weights"], Value::from("l.pt"));
    }

    #[test]
    fn test_empty_matrix_is_single_binding() {
        assert_eq!(ParamMatrix::new().expand().unwrap(), vec![Binding::new()]);
    }

    fn pipeline() -> Pipeline {
        let node = NodeBuilder::new("n", "run")
            .in_path("src")
            .out_path("dst", "out.json")
            .algo_param("a", 0)
            .algo_param("b", "w")
            .perf_param("workers", 1)
            .build()
            .unwrap();
        Pipeline::new(vec![node]).unwrap()
    }

    #[test]
    fn test_expander_applies_bindings() {
        let matrix: ParamMatrix = MatrixGrid::new()
            .axis("n.a", values(vec![1, 2]))
            .axis("n.src", values(vec!["in.txt"]))
            .into();

        let instances = MatrixExpander::expand(&pipeline(), &matrix).unwrap();
        assert_eq!(instances.len(), 2);

        let node = instances[1].pipeline.node("n").unwrap();
        assert_eq!(node.groups.algo_params["a"], Value::Int(2));
        assert_eq!(node.groups.in_paths["src"], Some(Value::from("in.txt")));
        assert_eq!(instances[1].name, "n.a=2, n.src=in.txt");
    }

    #[test]
    fn test_expander_unknown_keys() {
        let matrix: ParamMatrix = MatrixGrid::new().axis("m.a", values(vec![1])).into();
        assert!(matches!(
            MatrixExpander::expand(&pipeline(), &matrix),
            Err(MatrixError::UnknownNode { .. })
        ));

        let matrix: ParamMatrix = MatrixGrid::new().axis("n.zzz", values(vec![1])).into();
        assert!(matches!(
            MatrixExpander::expand(&pipeline(), &matrix),
            Err(MatrixError::UnknownParam { .. })
        ));

        let matrix: ParamMatrix = MatrixGrid::new().axis("nodot", values(vec![1])).into();
        assert_eq!(
            MatrixExpander::expand(&pipeline(), &matrix).unwrap_err(),
            MatrixError::InvalidKey("nodot".to_string())
        );
    }
}
