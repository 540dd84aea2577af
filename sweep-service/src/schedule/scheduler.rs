// Scheduler
// Dispatches a job plan to an execution backend in dependency order

use crate::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::runners::{ExecutionBackend, JobOutcome};
use crate::schedule::job::{JobId, JobState};
use crate::schedule::plan::JobPlan;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

/// Configuration for plan execution
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Maximum jobs running at once (0 = unlimited)
    pub max_parallel: usize,
}

impl SchedulerConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }
}

/// Shared flag that stops new dispatches when set
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A job that ran and failed
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub job_id: JobId,
    pub node: String,
    pub exit_code: Option<i32>,
    pub message: String,
}

/// A job that never ran because a predecessor failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedJob {
    pub job_id: JobId,
    pub node: String,
    pub failed_predecessor: JobId,
}

/// Final state of every job after a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub backend: String,
    /// `(job, state)` in plan order
    pub states: Vec<(JobId, JobState)>,
    pub failures: Vec<JobFailure>,
    pub blocked: Vec<BlockedJob>,
    /// Cancellation was requested before every job was dispatched
    pub cancelled: bool,
    pub duration: Duration,
}

impl RunReport {
    pub fn state(&self, id: &JobId) -> Option<JobState> {
        self.states
            .iter()
            .find(|(job, _)| job == id)
            .map(|(_, state)| *state)
    }

    pub fn count(&self, state: JobState) -> usize {
        self.states.iter().filter(|(_, s)| *s == state).count()
    }

    /// Every job succeeded or was cached
    pub fn success(&self) -> bool {
        self.states.iter().all(|(_, state)| state.is_satisfied())
    }
}

/// Drives a [`JobPlan`] through the job state machine
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every job in `plan` on `backend`.
    ///
    /// Job failures do not abort the run: dependents of a failed job are
    /// marked blocked and independent branches continue. The returned
    /// report lists every failure.
    pub async fn run(
        &self,
        plan: &JobPlan,
        backend: Arc<dyn ExecutionBackend>,
        events: Option<ProgressSender>,
    ) -> RunReport {
        let start = Instant::now();
        let mut run = RunState::new(plan, events.clone());

        events.send_event(ExecutionEvent::run_started(
            plan.len(),
            plan.cached_count(),
            backend.name(),
        ));
        tracing::info!(
            jobs = plan.len(),
            cached = plan.cached_count(),
            backend = backend.name(),
            max_parallel = self.config.max_parallel,
            "starting run"
        );

        // A cached root readies its dependents itself; skip them here
        for idx in 0..plan.len() {
            if run.waiting_on[idx] == 0 && run.states[idx] == JobState::Pending {
                run.make_ready(idx);
            }
        }

        let permits = match self.config.max_parallel {
            0 => plan.len().max(1),
            n => n,
        };
        let semaphore = Arc::new(Semaphore::new(permits));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<usize>();
        let mut running: JoinSet<(usize, Option<JobOutcome>)> = JoinSet::new();

        loop {
            if !self.cancel.is_cancelled() {
                while let Some(idx) = run.ready.pop_front() {
                    let job = plan.jobs()[idx].clone();
                    run.states[idx] = JobState::Dispatched;
                    events.send_event(ExecutionEvent::JobDispatched {
                        job_id: job.id.clone(),
                        node: job.node.clone(),
                    });

                    let backend = backend.clone();
                    let semaphore = semaphore.clone();
                    let started = started_tx.clone();
                    let cancel = self.cancel.clone();
                    let events = events.clone();
                    running.spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return (idx, None);
                        };
                        if cancel.is_cancelled() {
                            return (idx, None);
                        }
                        let _ = started.send(idx);

                        let job_id = job.id.clone();
                        let task = tokio::spawn(async move { backend.run(&job, events).await });
                        let outcome = match task.await {
                            Ok(outcome) => outcome,
                            Err(e) => JobOutcome::failed(
                                None,
                                Duration::ZERO,
                                format!("backend task for {} aborted: {}", job_id, e),
                            ),
                        };
                        (idx, Some(outcome))
                    });
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(idx) = started_rx.recv() => {
                    let job = &plan.jobs()[idx];
                    run.states[idx] = JobState::Running;
                    events.send_event(ExecutionEvent::job_started(
                        job.id.clone(),
                        job.node.clone(),
                        job.command.clone(),
                    ));
                }

                joined = running.join_next() => match joined {
                    Some(Ok((idx, Some(outcome)))) => run.complete(idx, outcome),
                    Some(Ok((idx, None))) => {
                        // Cancelled while waiting for a slot
                        run.states[idx] = JobState::Pending;
                    }
                    Some(Err(e)) => tracing::error!("scheduler task failed: {}", e),
                    None => break,
                },
            }
        }

        let cancelled = self.cancel.is_cancelled()
            && run.states.iter().any(|state| *state == JobState::Pending || *state == JobState::Ready);
        for state in run.states.iter_mut() {
            if *state == JobState::Ready {
                *state = JobState::Pending;
            }
        }
        if cancelled {
            tracing::warn!("run cancelled; undispatched jobs left pending");
            events.send_event(ExecutionEvent::warning(
                "run cancelled; undispatched jobs left pending",
                None,
            ));
        }

        let report = RunReport {
            backend: backend.name().to_string(),
            states: plan
                .jobs()
                .iter()
                .zip(run.states.iter())
                .map(|(job, state)| (job.id.clone(), *state))
                .collect(),
            failures: run.failures,
            blocked: run.blocked,
            cancelled,
            duration: start.elapsed(),
        };

        events.send_event(ExecutionEvent::RunCompleted {
            success: report.success(),
            duration: report.duration,
            succeeded: report.count(JobState::Succeeded),
            failed: report.count(JobState::Failed),
            blocked: report.count(JobState::Blocked),
            cached: report.count(JobState::Cached),
        });
        tracing::info!(
            succeeded = report.count(JobState::Succeeded),
            failed = report.count(JobState::Failed),
            blocked = report.count(JobState::Blocked),
            cached = report.count(JobState::Cached),
            "run finished in {:?}",
            report.duration
        );

        report
    }
}

/// Mutable bookkeeping for one run, indexed by plan position
struct RunState<'a> {
    plan: &'a JobPlan,
    events: Option<ProgressSender>,
    states: Vec<JobState>,
    /// Unsatisfied predecessor count per job
    waiting_on: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: VecDeque<usize>,
    failures: Vec<JobFailure>,
    blocked: Vec<BlockedJob>,
}

impl<'a> RunState<'a> {
    fn new(plan: &'a JobPlan, events: Option<ProgressSender>) -> Self {
        let jobs = plan.jobs();
        let mut dependents = vec![Vec::new(); jobs.len()];
        let mut waiting_on = vec![0; jobs.len()];

        for (idx, job) in jobs.iter().enumerate() {
            for pred in &job.predecessors {
                if let Some(pos) = plan.position(pred) {
                    dependents[pos].push(idx);
                    waiting_on[idx] += 1;
                }
            }
        }

        Self {
            plan,
            events,
            states: vec![JobState::Pending; jobs.len()],
            waiting_on,
            dependents,
            ready: VecDeque::new(),
            failures: Vec::new(),
            blocked: Vec::new(),
        }
    }

    /// All predecessors satisfied: short-circuit cached jobs, queue the rest
    fn make_ready(&mut self, idx: usize) {
        if self.states[idx] != JobState::Pending {
            return;
        }
        let plan = self.plan;
        let job = &plan.jobs()[idx];
        if job.cached {
            self.states[idx] = JobState::Cached;
            tracing::debug!(job = %job.id, "cache hit");
            self.events.send_event(ExecutionEvent::JobCached {
                job_id: job.id.clone(),
                node: job.node.clone(),
            });
            self.satisfy(idx);
        } else {
            self.states[idx] = JobState::Ready;
            self.ready.push_back(idx);
        }
    }

    fn satisfy(&mut self, idx: usize) {
        for pos in self.dependents[idx].clone() {
            self.waiting_on[pos] -= 1;
            if self.waiting_on[pos] == 0 && self.states[pos] == JobState::Pending {
                self.make_ready(pos);
            }
        }
    }

    fn complete(&mut self, idx: usize, outcome: JobOutcome) {
        let plan = self.plan;
        let job = &plan.jobs()[idx];
        self.states[idx] = outcome.state;
        self.events.send_event(ExecutionEvent::job_completed(
            job.id.clone(),
            job.node.clone(),
            outcome.state,
            outcome.duration,
            outcome.exit_code,
        ));

        if outcome.success() {
            tracing::info!(job = %job.id, "job succeeded in {:?}", outcome.duration);
            self.satisfy(idx);
            return;
        }

        let message = outcome
            .error
            .unwrap_or_else(|| "job failed".to_string());
        tracing::warn!(job = %job.id, exit_code = ?outcome.exit_code, "job failed: {}", message);
        self.events
            .send_event(ExecutionEvent::error(message.clone(), Some(job.id.clone())));
        self.failures.push(JobFailure {
            job_id: job.id.clone(),
            node: job.node.clone(),
            exit_code: outcome.exit_code,
            message,
        });
        self.block_dependents(idx);
    }

    /// Mark every transitive dependent of `failed` as blocked
    fn block_dependents(&mut self, failed: usize) {
        let plan = self.plan;
        let failed_id = plan.jobs()[failed].id.clone();
        let mut stack = self.dependents[failed].clone();

        while let Some(pos) = stack.pop() {
            if self.states[pos] != JobState::Pending {
                continue;
            }
            let job = &plan.jobs()[pos];
            self.states[pos] = JobState::Blocked;
            tracing::warn!(job = %job.id, failed = %failed_id, "job blocked by failed predecessor");
            self.events.send_event(ExecutionEvent::JobBlocked {
                job_id: job.id.clone(),
                node: job.node.clone(),
                failed_predecessor: failed_id.clone(),
            });
            self.blocked.push(BlockedJob {
                job_id: job.id.clone(),
                node: job.node.clone(),
                failed_predecessor: failed_id.clone(),
            });
            stack.extend(self.dependents[pos].iter().copied());
        }
    }
}
