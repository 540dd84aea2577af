// Schedule Module
// Job planning, command rendering and dependency-ordered dispatch

pub mod command;
pub mod job;
pub mod plan;
pub mod scheduler;

pub use command::{render_command, shell_quote};
pub use job::{Job, JobConfig, JobId, JobState, ResolvedParams};
pub use plan::{JobPlan, PlanError, PlanOptions, PlannedInstance};
pub use scheduler::{BlockedJob, CancelToken, JobFailure, RunReport, Scheduler, SchedulerConfig};
