// Sweep
// Ties a pipeline, a parameter matrix and run options into one workflow

use crate::cache::Workspace;
use crate::error::ServiceResult;
use crate::events::ProgressSender;
use crate::matrix::{Binding, MatrixExpander, ParamMatrix};
use crate::node::ResultMap;
use crate::parser::{PipelineParser, ScheduleConfig};
use crate::pipeline::Pipeline;
use crate::runners::ExecutionBackend;
use crate::schedule::{JobPlan, JobState, PlanOptions, RunReport, Scheduler};

use std::path::Path;
use std::sync::Arc;

/// Metrics gathered from one matrix instance
#[derive(Debug, Clone)]
pub struct InstanceResult {
    pub name: String,
    pub binding: Binding,
    /// `metrics.<node>.<metric>` for every node with a result loader
    pub metrics: ResultMap,
}

/// A pipeline swept over a parameter matrix
#[derive(Debug, Clone)]
pub struct Sweep {
    pipeline: Pipeline,
    matrix: ParamMatrix,
    options: PlanOptions,
}

impl Sweep {
    pub fn new(pipeline: Pipeline, matrix: ParamMatrix, options: PlanOptions) -> Self {
        Self {
            pipeline,
            matrix,
            options,
        }
    }

    /// Load the pipeline a params file points at and apply its settings.
    ///
    /// `pipeline_path` wins over the file's own `pipeline` entry. Relative
    /// literal `in_paths` resolve against the pipeline file's directory.
    pub fn from_config(config: &ScheduleConfig, pipeline_path: Option<&Path>) -> ServiceResult<Self> {
        let path = pipeline_path
            .map(Path::to_path_buf)
            .or_else(|| config.pipeline.clone())
            .ok_or_else(|| {
                crate::parser::ParseError::definition("no pipeline definition given")
                    .with_suggestion("set 'pipeline:' in the params file or pass --pipeline")
            })?;
        let pipeline = PipelineParser::load(&path)?;

        let workspace = match &config.root {
            Some(root) => Workspace::new(root),
            None => Workspace::default(),
        };
        let mut options = PlanOptions::new(workspace)?.with_cache_policy(config.cache_policy);
        // Relative literal inputs are relative to the pipeline file
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            let base_dir = options.base_dir.join(dir);
            options = options.with_base_dir(base_dir);
        }

        Ok(Self::new(pipeline, config.matrix.clone(), options))
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn matrix(&self) -> &ParamMatrix {
        &self.matrix
    }

    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    pub fn with_options(mut self, options: PlanOptions) -> Self {
        self.options = options;
        self
    }

    /// Expand, deduplicate and resolve every job
    pub fn plan(&self) -> ServiceResult<JobPlan> {
        for warning in self.pipeline.validate()? {
            tracing::warn!(node = ?warning.node, param = %warning.param, "{}", warning.message);
        }
        Ok(JobPlan::from_matrix(&self.pipeline, &self.matrix, &self.options)?)
    }

    /// Plan and execute on `backend`
    pub async fn run(
        &self,
        scheduler: &Scheduler,
        backend: Arc<dyn ExecutionBackend>,
        events: Option<ProgressSender>,
    ) -> ServiceResult<(JobPlan, RunReport)> {
        let plan = self.plan()?;
        let report = scheduler.run(&plan, backend, events).await;
        Ok((plan, report))
    }

    /// Load results for every instance whose jobs all finished
    pub fn results(&self, plan: &JobPlan, report: &RunReport) -> ServiceResult<Vec<InstanceResult>> {
        let mut results = Vec::new();

        for instance in plan.instances() {
            let finished = instance
                .jobs
                .values()
                .all(|id| report.state(id).map(JobState::is_satisfied).unwrap_or(false));
            if !finished {
                tracing::debug!(instance = %instance.name, "skipping unfinished instance");
                continue;
            }

            let concrete = MatrixExpander::apply(&self.pipeline, instance.binding.clone())?;
            let mut metrics = ResultMap::new();
            for (name, id) in &instance.jobs {
                let (Some(node), Some(job)) = (concrete.pipeline.node(name), plan.get(id)) else {
                    continue;
                };
                if node.kind.loads_results() {
                    metrics.extend(node.load_result(&job.working_dir)?);
                }
            }

            results.push(InstanceResult {
                name: instance.name.clone(),
                binding: instance.binding.clone(),
                metrics,
            });
        }

        Ok(results)
    }
}
