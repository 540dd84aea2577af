// Local Backend
// Runs jobs as child processes on this machine

use crate::cache::Workspace;
use crate::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::runners::shell::{OutputCallback, ShellConfig, ShellRunner};
use crate::runners::{ExecutionBackend, JobOutcome};
use crate::schedule::job::{Job, JobConfig};

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Backend that executes each job through the shell runner
#[derive(Debug, Clone)]
pub struct LocalBackend {
    runner: ShellRunner,
    workspace: Workspace,
    config: ShellConfig,
}

impl LocalBackend {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            runner: ShellRunner::new(),
            workspace,
            config: ShellConfig::default(),
        }
    }

    /// Kill jobs that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_runner(mut self, runner: ShellRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    fn prepare(&self, job: &Job) -> Result<(), String> {
        self.workspace
            .write_job_config(&job.working_dir, &JobConfig::from(job))
            .and_then(|_| self.workspace.clear_success(&job.working_dir))
            .map_err(|e| format!("failed to prepare {}: {}", job.working_dir.display(), e))
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn run(&self, job: &Job, events: Option<ProgressSender>) -> JobOutcome {
        let start = Instant::now();

        if let Err(message) = self.prepare(job) {
            return JobOutcome::failed(None, start.elapsed(), message);
        }

        let callback = events.map(|tx| {
            let job_id = job.id.clone();
            Arc::new(move |line: &str, is_error: bool| {
                tx.send_event(ExecutionEvent::JobOutput {
                    job_id: job_id.clone(),
                    output: line.to_string(),
                    is_error,
                });
            }) as OutputCallback
        });

        tracing::debug!(job = %job.id, command = %job.command, "spawning job");
        let output = self
            .runner
            .run(&job.command, &job.working_dir, &self.config, callback)
            .await;
        let duration = start.elapsed();

        if let Some(reason) = output.failure_reason() {
            return JobOutcome::failed(output.exit_code, duration, reason);
        }

        match self.workspace.mark_success(&job.working_dir) {
            Ok(()) => JobOutcome::succeeded(output.exit_code, duration),
            Err(e) => JobOutcome::failed(output.exit_code, duration, e.to_string()),
        }
    }
}
