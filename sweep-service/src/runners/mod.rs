// Runners Module
// Execution backends that consume job descriptors

pub mod dry_run;
pub mod local;
pub mod serial;
pub mod shell;
pub mod slurm;

// Re-export key types
pub use dry_run::DryRunBackend;
pub use local::LocalBackend;
pub use serial::render_serial_script;
pub use shell::{Shell, ShellConfig, ShellOutput, ShellRunner};
pub use slurm::{SlurmBackend, SlurmOptions};

use crate::events::ProgressSender;
use crate::schedule::job::{Job, JobState};

use std::time::Duration;

/// Result of handing one job to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    /// `Succeeded` or `Failed`
    pub state: JobState,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            state: JobState::Succeeded,
            exit_code,
            duration,
            error: None,
        }
    }

    pub fn failed(exit_code: Option<i32>, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            exit_code,
            duration,
            error: Some(error.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.state == JobState::Succeeded
    }
}

/// Something that can execute a single ready job.
///
/// The scheduler only calls `run` once every predecessor of `job` is
/// satisfied, so backends never need to check ordering themselves.
#[async_trait::async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short name used in events and logs
    fn name(&self) -> &str;

    /// Execute `job`; output lines may be streamed through `events`
    async fn run(&self, job: &Job, events: Option<ProgressSender>) -> JobOutcome;
}
