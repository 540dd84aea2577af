// Definition File Models
// Serde types for pipeline definition and schedule params files

use crate::cache::CachePolicy;
use crate::matrix::ParamMatrix;
use crate::node::ResourceHints;
use crate::params::{FieldSpec, Value};

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Root of a pipeline definition file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub nodes: Vec<NodeDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionDefinition>,
}

/// One node, either as a tagged schema (`fields`) or as explicit groups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDefinition {
    pub name: String,

    /// Command template; `{param}` placeholders are substituted
    pub executable: String,

    /// Tagged schema fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub in_paths: BTreeMap<String, Option<Value>>,

    /// With `fields`, entries here override declared output defaults
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub out_paths: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub algo_params: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub perf_params: BTreeMap<String, Value>,

    /// Key of the canonical output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,

    #[serde(default, skip_serializing_if = "ResourceHints::is_empty")]
    pub resources: ResourceHints,

    #[serde(default)]
    pub kind: NodeKindName,
}

impl NodeDefinition {
    pub fn uses_schema(&self) -> bool {
        !self.fields.is_empty()
    }
}

/// Built-in node kinds selectable from YAML
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindName {
    #[default]
    Process,
    JsonMetrics,
}

/// `from: a.outputs.x` / `to: b.inputs.y`; a bare node name in `from`
/// means that node's primary output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionDefinition {
    pub from: String,
    pub to: String,
}

/// Which backend a schedule runs on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Child processes on this machine
    #[default]
    Local,
    /// Report commands without running them
    #[serde(alias = "dry-run", alias = "dry")]
    DryRun,
    /// Render an sbatch submission script
    Slurm,
    /// Render a sequential bash driver
    Serial,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Local => "local",
            BackendKind::DryRun => "dry_run",
            BackendKind::Slurm => "slurm",
            BackendKind::Serial => "serial",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "local" => Ok(BackendKind::Local),
            "dry_run" | "dry" => Ok(BackendKind::DryRun),
            "slurm" => Ok(BackendKind::Slurm),
            "serial" => Ok(BackendKind::Serial),
            other => Err(format!(
                "unknown backend '{}', expected local, dry_run, slurm or serial",
                other
            )),
        }
    }
}

/// Cluster-wide sbatch settings in a params file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlurmSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name_prefix: Option<String>,
    /// Hints applied to every job; node hints win
    #[serde(flatten)]
    pub defaults: ResourceHints,
}

/// A schedule params file: what to sweep and how to run it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Pipeline definition, relative to the params file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "ParamMatrix::is_empty")]
    pub matrix: ParamMatrix,

    /// Run root; defaults to `~/.cache/dagsweep`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub cache_policy: CachePolicy,

    /// Maximum concurrent jobs (0 = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Per-job timeout in seconds, local backend only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub slurm: SlurmSection,
}

impl ScheduleConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}
