// Jobs
// Scheduler-level unit of work and its lifecycle states

use crate::cache::{CacheKey, InputLineage};
use crate::node::ResourceHints;
use crate::params::Value;

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Identity of a job: `<node>/<key>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(node: &str, key: &CacheKey) -> Self {
        JobId(format!("{}/{}", node, key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting on predecessors
    Pending,
    /// Every predecessor succeeded or was cached
    Ready,
    /// Satisfied by an existing output directory
    Cached,
    /// Handed to a backend
    Dispatched,
    Running,
    Succeeded,
    Failed,
    /// A predecessor failed; never dispatched
    Blocked,
}

impl JobState {
    /// Dependents may proceed
    pub fn is_satisfied(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Cached)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Cached | JobState::Failed | JobState::Blocked
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Ready => "ready",
            JobState::Cached => "cached",
            JobState::Dispatched => "dispatched",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

/// Parameter values after wiring and path resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    /// Absolute input paths
    pub in_paths: BTreeMap<String, Value>,
    /// Absolute output paths
    pub out_paths: BTreeMap<String, String>,
    pub algo_params: BTreeMap<String, Value>,
    pub perf_params: BTreeMap<String, Value>,
}

impl ResolvedParams {
    /// All parameters as `(name, value)` in flag order
    pub fn flags(&self) -> impl Iterator<Item = (&str, Value)> + '_ {
        let ins = self.in_paths.iter().map(|(k, v)| (k.as_str(), v.clone()));
        let outs = self
            .out_paths
            .iter()
            .map(|(k, v)| (k.as_str(), Value::String(v.clone())));
        let algo = self.algo_params.iter().map(|(k, v)| (k.as_str(), v.clone()));
        let perf = self.perf_params.iter().map(|(k, v)| (k.as_str(), v.clone()));
        ins.chain(outs).chain(algo).chain(perf)
    }
}

/// Descriptor of one concrete job, as handed to execution backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub node: String,
    pub key: CacheKey,
    /// Fully rendered, shell-quoted command line
    pub command: String,
    /// The job's output directory
    pub working_dir: PathBuf,
    /// Jobs that must be satisfied first, in plan order
    pub predecessors: Vec<JobId>,
    #[serde(default, skip_serializing_if = "ResourceHints::is_empty")]
    pub resources: ResourceHints,
    /// Set when the output directory already satisfies the cache policy
    pub cached: bool,
    pub params: ResolvedParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_output: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lineage: BTreeMap<String, InputLineage>,
}

/// Contents of `job_config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub node: String,
    pub key: CacheKey,
    pub command: String,
    pub params: ResolvedParams,
    pub lineage: BTreeMap<String, InputLineage>,
}

impl From<&Job> for JobConfig {
    fn from(job: &Job) -> Self {
        Self {
            node: job.node.clone(),
            key: job.key.clone(),
            command: job.command.clone(),
            params: job.params.clone(),
            lineage: job.lineage.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(JobState::Cached.is_satisfied());
        assert!(JobState::Succeeded.is_satisfied());
        assert!(!JobState::Failed.is_satisfied());
        assert!(JobState::Blocked.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert_eq!(JobState::Dispatched.to_string(), "dispatched");
    }

    #[test]
    fn test_flag_order() {
        let mut params = ResolvedParams::default();
        params.perf_params.insert("workers".into(), Value::Int(2));
        params.algo_params.insert("k".into(), Value::Int(1));
        params.out_paths.insert("dst".into(), "/w/out.json".into());
        params.in_paths.insert("src".into(), Value::from("/data/in.txt"));

        let names: Vec<&str> = params.flags().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["src", "dst", "k", "workers"]);
    }
}
