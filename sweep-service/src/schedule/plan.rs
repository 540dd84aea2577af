// Job Planning
// Resolves matrix instances into a deduplicated, dependency-ordered job list

use crate::cache::{CacheError, CacheKey, CachePolicy, InputLineage, Workspace};
use crate::matrix::{Binding, MatrixError, MatrixExpander, MatrixInstance, ParamMatrix};
use crate::node::{Node, PortRef};
use crate::params::Value;
use crate::pipeline::{GraphError, NodeGraph, Pipeline};
use crate::schedule::command::render_command;
use crate::schedule::job::{Job, JobConfig, JobId, ResolvedParams};

use thiserror::Error;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Errors raised while building a job plan
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to resolve working directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Inputs to planning besides the pipelines themselves
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub workspace: Workspace,
    pub cache_policy: CachePolicy,
    /// Directory relative input paths are resolved against
    pub base_dir: PathBuf,
}

impl PlanOptions {
    pub fn new(workspace: Workspace) -> Result<Self, PlanError> {
        Ok(Self {
            workspace,
            cache_policy: CachePolicy::default(),
            base_dir: std::env::current_dir()?,
        })
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }
}

/// Which job each node of one matrix instance maps to
#[derive(Debug, Clone)]
pub struct PlannedInstance {
    pub name: String,
    pub binding: Binding,
    pub jobs: BTreeMap<String, JobId>,
}

/// Deduplicated jobs in dependency order
#[derive(Debug, Clone, Default)]
pub struct JobPlan {
    jobs: Vec<Job>,
    index: HashMap<JobId, usize>,
    instances: Vec<PlannedInstance>,
}

impl JobPlan {
    /// Expand `matrix` over `pipeline` and plan every resulting instance
    pub fn from_matrix(
        pipeline: &Pipeline,
        matrix: &ParamMatrix,
        options: &PlanOptions,
    ) -> Result<Self, PlanError> {
        let instances = MatrixExpander::expand(pipeline, matrix)?;
        Self::build(&instances, options)
    }

    /// Plan already-expanded instances
    pub fn build(instances: &[MatrixInstance], options: &PlanOptions) -> Result<Self, PlanError> {
        let mut plan = JobPlan::default();

        for instance in instances {
            let graph = instance.pipeline.build_graph()?;
            let mut planned: BTreeMap<String, JobId> = BTreeMap::new();

            for name in graph.topological_order() {
                let node = instance
                    .pipeline
                    .node(name)
                    .ok_or_else(|| GraphError::unknown_node(format!("unknown node '{}'", name)))?;
                let job = plan.plan_node(&instance.pipeline, graph, node, &planned, options)?;
                planned.insert(name.clone(), job.id.clone());
                plan.insert(job);
            }

            plan.instances.push(PlannedInstance {
                name: instance.name.clone(),
                binding: instance.binding.clone(),
                jobs: planned,
            });
        }

        tracing::info!(
            jobs = plan.jobs.len(),
            instances = plan.instances.len(),
            cached = plan.cached_count(),
            "job plan built"
        );
        Ok(plan)
    }

    fn plan_node(
        &self,
        pipeline: &Pipeline,
        graph: &NodeGraph,
        node: &Node,
        planned: &BTreeMap<String, JobId>,
        options: &PlanOptions,
    ) -> Result<Job, PlanError> {
        let workspace = &options.workspace;
        let mut in_paths = BTreeMap::new();
        let mut external = BTreeMap::new();
        let mut lineage = BTreeMap::new();

        for (key, literal) in &node.groups.in_paths {
            let port = node.input(key.as_str());
            match graph.source_of(&port) {
                Some(src) if src.is_output() => {
                    if literal.is_some() {
                        tracing::debug!(input = %port, source = %src, "connection overrides literal input value");
                    }
                    let upstream = self.upstream_job(src, planned)?;
                    let path = upstream.params.out_paths.get(&src.key).ok_or_else(|| {
                        GraphError::unknown_port(format!("node '{}' has no port '{}'", src.node, src))
                    })?;
                    in_paths.insert(key.clone(), Value::String(path.clone()));
                    lineage.insert(
                        key.clone(),
                        InputLineage {
                            node: src.node.clone(),
                            port: src.key.clone(),
                            key: upstream.key.clone(),
                        },
                    );
                }
                Some(root) => {
                    let value = pipeline
                        .node(&root.node)
                        .and_then(|n| n.groups.in_paths.get(&root.key))
                        .cloned()
                        .flatten()
                        .ok_or_else(|| unbound(&port, Some(root)))?;
                    let value = absolutize(&options.base_dir, value);
                    in_paths.insert(key.clone(), value.clone());
                    external.insert(key.clone(), value);
                }
                None => {
                    let value = literal.clone().ok_or_else(|| unbound(&port, None))?;
                    let value = absolutize(&options.base_dir, value);
                    in_paths.insert(key.clone(), value.clone());
                    external.insert(key.clone(), value);
                }
            }
        }

        let key = CacheKey::compute(&node.name, &node.groups.algo_params, &external, &lineage);
        let working_dir = workspace.node_dir(&node.name, &key);

        let out_paths = node
            .groups
            .out_paths
            .iter()
            .map(|(name, rel)| {
                let path = workspace.resolve_out_path(&working_dir, rel);
                (name.clone(), path.to_string_lossy().into_owned())
            })
            .collect();

        let params = ResolvedParams {
            in_paths,
            out_paths,
            algo_params: node.groups.algo_params.clone(),
            perf_params: node.groups.perf_params.clone(),
        };

        let mut predecessors: Vec<JobId> = lineage
            .values()
            .map(|src| JobId::new(&src.node, &src.key))
            .collect();
        predecessors.sort_by_key(|id| self.index.get(id).copied().unwrap_or(usize::MAX));
        predecessors.dedup();

        let primary = node.primary_out_path();
        let cached = workspace.is_cached(options.cache_policy, &working_dir, primary);
        let primary_output = primary.map(|rel| workspace.resolve_out_path(&working_dir, rel));

        Ok(Job {
            id: JobId::new(&node.name, &key),
            node: node.name.clone(),
            command: render_command(&node.executable, &params),
            key,
            working_dir,
            predecessors,
            resources: node.resources.clone(),
            cached,
            params,
            primary_output,
            lineage,
        })
    }

    fn upstream_job(&self, src: &PortRef, planned: &BTreeMap<String, JobId>) -> Result<&Job, PlanError> {
        planned
            .get(&src.node)
            .and_then(|id| self.get(id))
            .ok_or_else(|| {
                GraphError::unknown_node(format!("upstream node '{}' has not been planned", src.node))
                    .into()
            })
    }

    /// Keep the first job for an identity; later duplicates are dropped
    fn insert(&mut self, job: Job) {
        if let Some(&existing) = self.index.get(&job.id) {
            if self.jobs[existing].params.perf_params != job.params.perf_params {
                tracing::debug!(
                    job = %job.id,
                    "duplicate job differs only in perf params; keeping first"
                );
            }
            return;
        }
        self.index.insert(job.id.clone(), self.jobs.len());
        self.jobs.push(job);
    }

    /// Jobs in an order where predecessors always come first
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.index.get(id).map(|&idx| &self.jobs[idx])
    }

    pub fn position(&self, id: &JobId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn instances(&self) -> &[PlannedInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn cached_count(&self) -> usize {
        self.jobs.iter().filter(|job| job.cached).count()
    }

    /// Jobs that list `id` as a direct predecessor
    pub fn dependents<'a>(&'a self, id: &'a JobId) -> impl Iterator<Item = &'a Job> + 'a {
        self.jobs
            .iter()
            .filter(move |job| job.predecessors.contains(id))
    }

    /// Write `job_config.json` into every job directory
    pub fn write_job_configs(&self, workspace: &Workspace) -> Result<(), PlanError> {
        for job in &self.jobs {
            workspace.write_job_config(&job.working_dir, &JobConfig::from(job))?;
        }
        Ok(())
    }
}

fn unbound(port: &PortRef, root: Option<&PortRef>) -> PlanError {
    let message = match root {
        Some(root) if root != port => format!(
            "input '{}' is wired to '{}' which has no value",
            port, root
        ),
        _ => format!("input '{}' has neither a value nor a connection", port),
    };
    GraphError::unbound_input(message).into()
}

/// Resolve relative string paths against `base`
fn absolutize(base: &Path, value: Value) -> Value {
    match value {
        Value::String(path) if !path.is_empty() && Path::new(&path).is_relative() => {
            Value::String(base.join(&path).to_string_lossy().into_owned())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixGrid;
    use crate::node::{NodeBuilder, ResourceHints};
    use crate::pipeline::GraphErrorKind;

    fn producer() -> Node {
        NodeBuilder::new("produce", "python produce.py")
            .in_path_default("src", "data/in.txt")
            .out_path("dst", "out.json")
            .algo_param("seed", 0)
            .perf_param("workers", 1)
            .resources(ResourceHints::new().with_gpus(1))
            .build()
            .unwrap()
    }

    fn consumer() -> Node {
        NodeBuilder::new("consume", "python consume.py {src}")
            .in_path("src")
            .out_path("report", "report.json")
            .algo_param("threshold", 0.5)
            .build()
            .unwrap()
    }

    fn pipeline() -> Pipeline {
        let mut pipeline = Pipeline::new(vec![producer(), consumer()]).unwrap();
        pipeline
            .connect(
                PortRef::output("produce", "dst"),
                PortRef::input("consume", "src"),
            )
            .unwrap();
        pipeline
    }

    fn options(root: &Path) -> PlanOptions {
        PlanOptions {
            workspace: Workspace::new(root),
            cache_policy: CachePolicy::Never,
            base_dir: PathBuf::from("/base"),
        }
    }

    fn values<T: Into<Value>>(items: Vec<T>) -> Vec<Value> {
        items.into_iter().map(Into::into).collect()
    }

    #[test]
    fn test_plan_resolves_paths_and_lineage() {
        let plan = JobPlan::from_matrix(&pipeline(), &ParamMatrix::new(), &options(Path::new("/runs"))).unwrap();
        assert_eq!(plan.len(), 2);

        let produce = &plan.jobs()[0];
        let consume = &plan.jobs()[1];
        assert_eq!(produce.node, "produce");
        assert_eq!(produce.params.in_paths["src"], Value::from("/base/data/in.txt"));
        assert!(produce
            .working_dir
            .starts_with("/runs/produce"));
        assert_eq!(produce.resources.gpus, Some(1));

        let expected_src = produce.working_dir.join("out.json");
        assert_eq!(
            consume.params.in_paths["src"],
            Value::from(expected_src.to_string_lossy().into_owned())
        );
        assert_eq!(consume.predecessors, vec![produce.id.clone()]);
        assert_eq!(consume.lineage["src"].key, produce.key);
        assert!(consume.command.starts_with(&format!(
            "python consume.py {}",
            expected_src.display()
        )));
        assert!(!consume.command.contains("--src="));
    }

    #[test]
    fn test_perf_params_do_not_change_output_dir() {
        let matrix: ParamMatrix = MatrixGrid::new()
            .axis("produce.workers", values(vec![1, 8]))
            .into();
        let plan = JobPlan::from_matrix(&pipeline(), &matrix, &options(Path::new("/runs"))).unwrap();

        assert_eq!(plan.instances().len(), 2);
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.instances()[0].jobs["produce"],
            plan.instances()[1].jobs["produce"]
        );
    }

    #[test]
    fn test_algo_sweep_fans_out_consumers() {
        let matrix: ParamMatrix = MatrixGrid::new()
            .axis("produce.seed", values(vec![1, 2, 3]))
            .into();
        let plan = JobPlan::from_matrix(&pipeline(), &matrix, &options(Path::new("/runs"))).unwrap();

        assert_eq!(plan.len(), 6);
        for instance in plan.instances() {
            let consume = plan.get(&instance.jobs["consume"]).unwrap();
            assert_eq!(consume.predecessors, vec![instance.jobs["produce"].clone()]);
        }
    }

    #[test]
    fn test_unbound_input_is_plan_error() {
        let pipeline = Pipeline::new(vec![consumer()]).unwrap();
        let err = JobPlan::from_matrix(&pipeline, &ParamMatrix::new(), &options(Path::new("/runs")))
            .unwrap_err();
        match err {
            PlanError::Graph(err) => {
                assert_eq!(err.kind, GraphErrorKind::UnboundInput);
                assert!(err.message.contains("consume.inputs.src"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_input_default_is_plan_error() {
        let node = NodeBuilder::new("consume", "python consume.py {src}")
            .in_path_default("src", "")
            .out_path("report", "report.json")
            .build()
            .unwrap();
        assert_eq!(node.warnings().len(), 1);

        let pipeline = Pipeline::new(vec![node]).unwrap();
        let err = JobPlan::from_matrix(&pipeline, &ParamMatrix::new(), &options(Path::new("/runs")))
            .unwrap_err();
        match err {
            PlanError::Graph(err) => assert_eq!(err.kind, GraphErrorKind::UnboundInput),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_input_alias_shares_value() {
        let truth = NodeBuilder::new("score", "score")
            .in_path("truth")
            .in_path("pred")
            .out_path("dst", "score.json")
            .build()
            .unwrap();
        let predict = NodeBuilder::new("predict", "predict")
            .in_path_default("truth", "/data/truth.json")
            .out_path("dst", "pred.json")
            .build()
            .unwrap();

        let mut pipeline = Pipeline::new(vec![truth, predict]).unwrap();
        pipeline
            .connect(PortRef::input("predict", "truth"), PortRef::input("score", "truth"))
            .unwrap();
        pipeline
            .connect(PortRef::output("predict", "dst"), PortRef::input("score", "pred"))
            .unwrap();

        let plan = JobPlan::from_matrix(&pipeline, &ParamMatrix::new(), &options(Path::new("/runs"))).unwrap();
        let score = plan.jobs().iter().find(|job| job.node == "score").unwrap();
        assert_eq!(score.params.in_paths["truth"], Value::from("/data/truth.json"));
        assert_eq!(score.predecessors.len(), 1);
    }

    #[test]
    fn test_cache_policy_marks_existing_outputs() {
        let temp = tempfile::tempdir().unwrap();
        let opts = options(temp.path()).with_cache_policy(CachePolicy::PrimaryExists);

        let first = JobPlan::from_matrix(&pipeline(), &ParamMatrix::new(), &opts).unwrap();
        assert_eq!(first.cached_count(), 0);

        let produce = &first.jobs()[0];
        std::fs::create_dir_all(&produce.working_dir).unwrap();
        std::fs::write(produce.working_dir.join("out.json"), "{}").unwrap();

        let second = JobPlan::from_matrix(&pipeline(), &ParamMatrix::new(), &opts).unwrap();
        assert!(second.jobs()[0].cached);
        assert!(!second.jobs()[1].cached);
    }

    #[test]
    fn test_write_job_configs() {
        let temp = tempfile::tempdir().unwrap();
        let opts = options(temp.path());
        let plan = JobPlan::from_matrix(&pipeline(), &ParamMatrix::new(), &opts).unwrap();
        plan.write_job_configs(&opts.workspace).unwrap();

        for job in plan.jobs() {
            let text = std::fs::read_to_string(job.working_dir.join("job_config.json")).unwrap();
            let config: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(config["node"], job.node.as_str());
            assert_eq!(config["key"], job.key.as_str());
        }
    }
}
