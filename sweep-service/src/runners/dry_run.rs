// Dry-Run Backend
// Records dispatched commands without executing anything

use crate::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::runners::{ExecutionBackend, JobOutcome};
use crate::schedule::job::{Job, JobId};

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend that reports every job as succeeded and keeps the dispatch order
#[derive(Debug, Clone, Default)]
pub struct DryRunBackend {
    dispatched: Arc<Mutex<Vec<(JobId, String)>>>,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(job, command)` pairs in the order they were dispatched
    pub fn dispatched(&self) -> Vec<(JobId, String)> {
        match self.dispatched.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for DryRunBackend {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn run(&self, job: &Job, events: Option<ProgressSender>) -> JobOutcome {
        tracing::info!(job = %job.id, "dry run: {}", job.command);
        events.send_event(ExecutionEvent::info(
            format!("would run in {}: {}", job.working_dir.display(), job.command),
            Some(job.id.clone()),
        ));

        match self.dispatched.lock() {
            Ok(mut guard) => guard.push((job.id.clone(), job.command.clone())),
            Err(poisoned) => poisoned
                .into_inner()
                .push((job.id.clone(), job.command.clone())),
        }

        JobOutcome::succeeded(None, Duration::ZERO)
    }
}
