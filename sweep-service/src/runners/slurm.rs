// Slurm Backend
// Renders sbatch submission scripts for a job plan

use crate::cache::SUCCESS_MARKER;
use crate::node::ResourceHints;
use crate::runners::shell::{ShellConfig, ShellOutput, ShellRunner};
use crate::schedule::command::shell_quote;
use crate::schedule::job::Job;
use crate::schedule::plan::JobPlan;

use std::fmt::Write as _;
use std::path::Path;

/// Cluster-wide submission settings
#[derive(Debug, Clone)]
pub struct SlurmOptions {
    /// Prefix for `--job-name`
    pub job_name_prefix: String,
    /// Hints applied to every job; per-node hints win
    pub defaults: ResourceHints,
}

impl Default for SlurmOptions {
    fn default() -> Self {
        Self {
            job_name_prefix: "dagsweep".to_string(),
            defaults: ResourceHints::default(),
        }
    }
}

/// Submission adapter for Slurm clusters.
///
/// Nothing here talks to the cluster queue; the backend only produces a
/// bash script that calls `sbatch` once per job, chaining dependencies with
/// `--dependency=afterok:`.
#[derive(Debug, Clone, Default)]
pub struct SlurmBackend {
    options: SlurmOptions,
}

impl SlurmBackend {
    pub fn new(options: SlurmOptions) -> Self {
        Self { options }
    }

    /// Whether `sbatch` is on the PATH
    pub fn is_available() -> bool {
        which::which("sbatch").is_ok()
    }

    /// `sbatch` options for one job, without dependencies
    pub fn sbatch_args(&self, job: &Job) -> Vec<String> {
        let hints = self.options.defaults.merged(&job.resources);
        let mut args = vec![
            format!("--job-name={}-{}", self.options.job_name_prefix, job.node),
            format!("--chdir={}", shell_quote(&job.working_dir.to_string_lossy())),
            format!(
                "--output={}",
                shell_quote(&job.working_dir.join("slurm-%j.out").to_string_lossy())
            ),
        ];

        if let Some(partition) = &hints.partition {
            args.push(format!("--partition={}", shell_quote(partition)));
        }
        if let Some(gpus) = hints.gpus {
            args.push(format!("--gres=gpu:{}", gpus));
        }
        if let Some(time) = &hints.time {
            args.push(format!("--time={}", shell_quote(time)));
        }
        if let Some(cpus) = hints.cpus {
            args.push(format!("--cpus-per-task={}", cpus));
        }
        if let Some(mem) = &hints.mem {
            args.push(format!("--mem={}", shell_quote(mem)));
        }
        for (key, value) in &hints.extra {
            if value.is_empty() {
                args.push(format!("--{}", key));
            } else {
                args.push(format!("--{}={}", key, shell_quote(value)));
            }
        }

        args
    }

    /// Render the submission script for every non-cached job in `plan`
    pub fn render_script(&self, plan: &JobPlan) -> String {
        let pending = plan.len() - plan.cached_count();
        let mut script = String::new();
        let _ = writeln!(script, "#!/bin/bash");
        let _ = writeln!(
            script,
            "# dagsweep slurm submission: {} jobs ({} cached)",
            pending,
            plan.cached_count()
        );
        let _ = writeln!(script, "set -e");

        for (idx, job) in plan.jobs().iter().enumerate() {
            script.push('\n');
            if job.cached {
                let _ = writeln!(script, "# cached: {}", job.id);
                continue;
            }

            let deps: Vec<String> = job
                .predecessors
                .iter()
                .filter_map(|id| plan.position(id).map(|pos| (pos, plan.jobs()[pos].cached)))
                .filter(|(_, cached)| !cached)
                .map(|(pos, _)| format!("${}", job_var(pos)))
                .collect();

            let mut args = self.sbatch_args(job);
            if !deps.is_empty() {
                args.push(format!("--dependency=afterok:{}", deps.join(":")));
            }
            let wrapped = format!(
                "rm -f {marker} && {} && touch {marker}",
                job.command,
                marker = SUCCESS_MARKER
            );
            args.push(format!("--wrap={}", shell_quote(&wrapped)));

            let _ = writeln!(script, "# {}", job.id);
            let _ = writeln!(
                script,
                "mkdir -p {}",
                shell_quote(&job.working_dir.to_string_lossy())
            );
            let _ = writeln!(script, "{}=$(sbatch --parsable \\", job_var(idx));
            for arg in &args {
                let _ = writeln!(script, "    {} \\", arg);
            }
            script.push_str(")\n");
            let _ = writeln!(script, "echo \"submitted {} as ${}\"", job.id, job_var(idx));
        }

        script
    }

    /// Write the rendered script to `path`
    pub fn write_script(&self, plan: &JobPlan, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render_script(plan))
    }

    /// Execute a previously written script; requires `sbatch`
    pub async fn submit(&self, script: &Path) -> ShellOutput {
        let dir = script.parent().unwrap_or_else(|| Path::new("."));
        let command = format!("bash {}", shell_quote(&script.to_string_lossy()));
        ShellRunner::new()
            .run(&command, dir, &ShellConfig::default(), None)
            .await
    }
}

fn job_var(idx: usize) -> String {
    format!("JOB_{:03}", idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachePolicy, Workspace};
    use crate::matrix::ParamMatrix;
    use crate::node::{NodeBuilder, PortRef};
    use crate::pipeline::Pipeline;
    use crate::schedule::plan::PlanOptions;

    fn plan(root: &Path, policy: CachePolicy) -> JobPlan {
        let prepare = NodeBuilder::new("cpu_prepare", "python prepare.py")
            .in_path_default("src", "/data/in.json")
            .out_path("prepared", "prepared.json")
            .build()
            .unwrap();
        let infer = NodeBuilder::new("torch_infer", "python infer.py")
            .in_path("input")
            .out_path("summary", "summary.json")
            .resources(
                ResourceHints::new()
                    .with_gpus(1)
                    .with_time("00:15:00")
                    .with_extra("exclusive", ""),
            )
            .build()
            .unwrap();
        let mut pipeline = Pipeline::new(vec![prepare, infer]).unwrap();
        pipeline
            .connect(
                PortRef::output("cpu_prepare", "prepared"),
                PortRef::input("torch_infer", "input"),
            )
            .unwrap();

        let options = PlanOptions::new(Workspace::new(root))
            .unwrap()
            .with_cache_policy(policy);
        JobPlan::from_matrix(&pipeline, &ParamMatrix::new(), &options).unwrap()
    }

    #[test]
    fn test_resource_flags() {
        let plan = plan(Path::new("/runs"), CachePolicy::Never);
        let backend = SlurmBackend::new(SlurmOptions {
            defaults: ResourceHints::new().with_partition("general").with_gpus(0),
            ..Default::default()
        });

        let args = backend.sbatch_args(&plan.jobs()[1]);
        assert!(args.contains(&"--job-name=dagsweep-torch_infer".to_string()));
        assert!(args.contains(&"--partition=general".to_string()));
        assert!(args.contains(&"--gres=gpu:1".to_string()));
        assert!(args.contains(&"--time=00:15:00".to_string()));
        assert!(args.contains(&"--exclusive".to_string()));
    }

    #[test]
    fn test_script_chains_dependencies() {
        let plan = plan(Path::new("/runs"), CachePolicy::Never);
        let script = SlurmBackend::default().render_script(&plan);

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("JOB_000=$(sbatch --parsable"));
        assert!(script.contains("JOB_001=$(sbatch --parsable"));
        assert!(script.contains("--dependency=afterok:$JOB_000"));
        assert!(script.contains("--wrap='rm -f .dagsweep_success && python infer.py"));
        assert!(script.contains("&& touch .dagsweep_success'"));
        assert_eq!(
            script.matches("--wrap='rm -f .dagsweep_success && ").count(),
            plan.len()
        );
    }

    #[test]
    fn test_cached_jobs_are_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let first = plan(temp.path(), CachePolicy::PrimaryExists);
        let prepare = &first.jobs()[0];
        std::fs::create_dir_all(&prepare.working_dir).unwrap();
        std::fs::write(prepare.working_dir.join("prepared.json"), "{}").unwrap();

        let plan = plan(temp.path(), CachePolicy::PrimaryExists);
        let script = SlurmBackend::default().render_script(&plan);

        assert!(script.contains(&format!("# cached: {}", plan.jobs()[0].id)));
        assert!(!script.contains("JOB_000="));
        assert!(!script.contains("--dependency"));
        assert!(script.contains("JOB_001=$(sbatch"));
    }
}
