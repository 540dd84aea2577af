// Run Events
// Progress reporting and event types for sweep execution

use crate::schedule::job::{JobId, JobState};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for run progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for run progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Unbounded channel between the scheduler and a renderer
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a job plan is executed
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started
    RunStarted {
        total_jobs: usize,
        cached_jobs: usize,
        backend: String,
    },

    /// Run finished; failures are reported, not raised
    RunCompleted {
        success: bool,
        duration: Duration,
        succeeded: usize,
        failed: usize,
        blocked: usize,
        cached: usize,
    },

    /// Job satisfied by an existing output directory
    JobCached { job_id: JobId, node: String },

    /// Job handed to the backend, waiting for a slot
    JobDispatched { job_id: JobId, node: String },

    /// Job process started
    JobStarted {
        job_id: JobId,
        node: String,
        command: String,
    },

    /// Job output (stdout/stderr)
    JobOutput {
        job_id: JobId,
        output: String,
        is_error: bool,
    },

    /// Job reached a terminal state
    JobCompleted {
        job_id: JobId,
        node: String,
        state: JobState,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Job will not run because a predecessor failed
    JobBlocked {
        job_id: JobId,
        node: String,
        failed_predecessor: JobId,
    },

    /// Free-form message for the run log
    Log {
        level: LogLevel,
        message: String,
        job_id: Option<JobId>,
    },
}

/// Severity of a [`ExecutionEvent::Log`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn run_started(total_jobs: usize, cached_jobs: usize, backend: impl Into<String>) -> Self {
        Self::RunStarted {
            total_jobs,
            cached_jobs,
            backend: backend.into(),
        }
    }

    pub fn job_started(job_id: JobId, node: impl Into<String>, command: impl Into<String>) -> Self {
        Self::JobStarted {
            job_id,
            node: node.into(),
            command: command.into(),
        }
    }

    pub fn job_completed(
        job_id: JobId,
        node: impl Into<String>,
        state: JobState,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::JobCompleted {
            job_id,
            node: node.into(),
            state,
            duration,
            exit_code,
        }
    }

    pub fn info(message: impl Into<String>, job_id: Option<JobId>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            job_id,
        }
    }

    pub fn warning(message: impl Into<String>, job_id: Option<JobId>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            job_id,
        }
    }

    pub fn error(message: impl Into<String>, job_id: Option<JobId>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            job_id,
        }
    }
}

/// Send an event if anyone is listening; a closed channel is not an error
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use std::collections::BTreeMap;

    fn train_job() -> JobId {
        let key = CacheKey::compute("train", &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new());
        JobId::new("train", &key)
    }

    #[tokio::test]
    async fn test_events_arrive_in_send_order() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::run_started(2, 1, "local"));
        tx.send_event(ExecutionEvent::job_started(train_job(), "train", "python train.py"));
        drop(tx);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event);
        }
        assert!(matches!(
            seen[0],
            ExecutionEvent::RunStarted { total_jobs: 2, cached_jobs: 1, .. }
        ));
        assert!(matches!(&seen[1], ExecutionEvent::JobStarted { node, .. } if node == "train"));
    }

    #[test]
    fn test_job_completed_fields() {
        let id = train_job();
        let event = ExecutionEvent::job_completed(
            id.clone(),
            "train",
            JobState::Failed,
            Duration::from_millis(1500),
            Some(3),
        );

        let ExecutionEvent::JobCompleted { job_id, state, exit_code, .. } = event else {
            panic!("expected JobCompleted");
        };
        assert_eq!(job_id, id);
        assert_eq!(state, JobState::Failed);
        assert_eq!(exit_code, Some(3));
    }

    #[test]
    fn test_send_without_listener() {
        let none: Option<ProgressSender> = None;
        none.send_event(ExecutionEvent::warning("nobody listens", None));

        let (tx, rx) = progress_channel();
        drop(rx);
        tx.send_event(ExecutionEvent::error("receiver gone", Some(train_job())));
    }
}
