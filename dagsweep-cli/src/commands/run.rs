use crate::commands::{slurm_options, SweepArgs};
use crate::output;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;

use sweep_service::events::LogLevel;
use sweep_service::{
    progress_channel, BackendKind, DryRunBackend, ExecutionBackend, ExecutionEvent, JobPlan,
    JobState, LocalBackend, ScheduleConfig, Scheduler, SchedulerConfig, SlurmBackend, Sweep,
};

/// Run a parameter sweep
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,

    /// Where to write the Slurm submission script (slurm backend)
    #[arg(long, value_name = "FILE")]
    pub script: Option<PathBuf>,

    /// Hide job stdout/stderr
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let (config, sweep) = args.sweep.sweep()?;

    output::status("Planning", &format!("{} backend", config.backend));
    let plan = sweep.plan().map_err(|e| eyre!("{}", e))?;
    output::info(&format!(
        "{} instances, {} jobs ({} cached)",
        plan.instances().len(),
        plan.len(),
        plan.cached_count()
    ));

    match config.backend {
        BackendKind::Local => {
            let backend = LocalBackend::new(sweep.options().workspace.clone())
                .with_timeout(config.timeout());
            run_scheduled(&config, sweep, plan, Arc::new(backend), args.quiet).await
        }
        BackendKind::DryRun => {
            run_scheduled(&config, sweep, plan, Arc::new(DryRunBackend::new()), args.quiet).await
        }
        BackendKind::Slurm => submit_slurm(&config, &sweep, &plan, args.script).await,
        BackendKind::Serial => bail!(
            "the serial backend only produces a driver script; use `dagsweep script --backend serial`"
        ),
    }
}

async fn run_scheduled(
    config: &ScheduleConfig,
    sweep: Sweep,
    plan: JobPlan,
    backend: Arc<dyn ExecutionBackend>,
    quiet: bool,
) -> Result<()> {
    let max_parallel = config.max_parallel.unwrap_or_else(default_parallelism);
    let scheduler = Scheduler::new(SchedulerConfig::default().with_max_parallel(max_parallel));

    let cancel = scheduler.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let (tx, mut rx) = progress_channel();
    let run_handle = tokio::spawn(async move {
        let report = scheduler.run(&plan, backend, Some(tx)).await;
        (plan, report)
    });

    // Commands are printed with their completion line
    let mut commands: HashMap<String, String> = HashMap::new();
    let mut overall_success = true;

    while let Some(event) = rx.recv().await {
        match &event {
            ExecutionEvent::RunStarted {
                total_jobs,
                cached_jobs,
                backend,
            } => {
                println!();
                output::header(&format!(
                    "Running {} jobs on {} ({} cached)",
                    total_jobs, backend, cached_jobs
                ));
            }

            ExecutionEvent::RunCompleted {
                success,
                duration,
                succeeded,
                failed,
                blocked,
                cached,
            } => {
                println!();
                overall_success = *success;
                let counts = format!(
                    "{} succeeded, {} cached, {} failed, {} blocked",
                    succeeded, cached, failed, blocked
                );
                if *success {
                    output::success(&format!(
                        "Sweep completed in {:.2}s: {}",
                        duration.as_secs_f64(),
                        counts
                    ));
                } else {
                    output::failure(&format!(
                        "Sweep failed after {:.2}s: {}",
                        duration.as_secs_f64(),
                        counts
                    ));
                }
            }

            ExecutionEvent::JobCached { job_id, .. } => {
                output::job_line(JobState::Cached, job_id.as_str(), None);
            }

            ExecutionEvent::JobDispatched { job_id, node } => {
                tracing::debug!(job = %job_id, node = %node, "dispatched");
            }

            ExecutionEvent::JobStarted {
                job_id, command, ..
            } => {
                output::status("Running", job_id.as_str());
                commands.insert(job_id.to_string(), command.clone());
            }

            ExecutionEvent::JobOutput {
                output, is_error, ..
            } => {
                if quiet {
                    continue;
                }
                for line in output.lines() {
                    if *is_error {
                        output::job_error(line);
                    } else {
                        output::job_output(line);
                    }
                }
            }

            ExecutionEvent::JobCompleted {
                job_id,
                state,
                duration,
                exit_code,
                ..
            } => {
                output::job_line(*state, job_id.as_str(), Some(*duration));
                if *state == JobState::Failed {
                    if let Some(code) = exit_code {
                        output::dim(&format!("             exit code: {}", code));
                    }
                    if let Some(command) = commands.get(job_id.as_str()) {
                        output::dim(&format!("             $ {}", command));
                    }
                }
            }

            ExecutionEvent::JobBlocked {
                job_id,
                failed_predecessor,
                ..
            } => {
                output::job_line(JobState::Blocked, job_id.as_str(), None);
                output::dim(&format!("             after failure of {}", failed_predecessor));
            }

            ExecutionEvent::Log { level, message, .. } => match level {
                LogLevel::Error => output::error(message),
                LogLevel::Warning => output::warning(message),
                LogLevel::Info => output::info(message),
                LogLevel::Debug => output::dim(message),
            },
        }
    }

    let (plan, report) = run_handle.await?;

    if report.cancelled {
        output::warning(&format!(
            "Cancelled: {} jobs were never started",
            report.count(JobState::Pending)
        ));
    }

    print_results(&sweep, &plan, &report);

    if !overall_success {
        std::process::exit(1);
    }

    Ok(())
}

fn print_results(sweep: &Sweep, plan: &JobPlan, report: &sweep_service::RunReport) {
    let results = match sweep.results(plan, report) {
        Ok(results) => results,
        Err(e) => {
            output::warning(&format!("Could not load results: {}", e));
            return;
        }
    };
    if results.iter().all(|result| result.metrics.is_empty()) {
        return;
    }

    println!();
    output::header("Results");
    for result in results {
        println!("{}", result.name);
        for (key, value) in &result.metrics {
            println!("    {} = {}", key, value.as_arg());
        }
    }
}

async fn submit_slurm(
    config: &ScheduleConfig,
    sweep: &Sweep,
    plan: &JobPlan,
    script: Option<PathBuf>,
) -> Result<()> {
    let workspace = &sweep.options().workspace;
    plan.write_job_configs(workspace).map_err(|e| eyre!("{}", e))?;

    let backend = SlurmBackend::new(slurm_options(config));

    let script = script.unwrap_or_else(|| workspace.root().join("submit_slurm.sh"));
    if let Some(parent) = script.parent() {
        std::fs::create_dir_all(parent)?;
    }
    backend.write_script(plan, &script)?;
    output::success(&format!("Wrote {}", script.display()));

    if !SlurmBackend::is_available() {
        bail!(
            "sbatch not found on PATH; submit {} from a cluster login node",
            script.display()
        );
    }

    output::status("Submitting", &format!("{} jobs", plan.len() - plan.cached_count()));
    let result = backend.submit(&script).await;
    for line in result.stdout.lines() {
        output::job_output(line);
    }
    for line in result.stderr.lines() {
        output::job_error(line);
    }

    if let Some(reason) = result.failure_reason() {
        output::failure(&format!("Submission {}", reason));
        std::process::exit(1);
    }
    output::success("Submitted");
    Ok(())
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
