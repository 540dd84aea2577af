// Sweep Service Library
// Core service for parameter-sweep pipelines: typed nodes, DAG wiring,
// content-hashed output caching and dependency-ordered job dispatch

pub mod cache;
pub mod error;
pub mod events;
pub mod matrix;
pub mod node;
pub mod params;
pub mod parser;
pub mod pipeline;
pub mod runners;
pub mod schedule;
pub mod sweep;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export definition types
pub use node::{Node, NodeBuilder, NodeKind, PortRef, ResourceHints, ResultLoader};
pub use params::{derive_groups, BindingWarning, FieldSpec, FieldTag, ParamError, Value};
pub use pipeline::{Connection, GraphError, GraphErrorKind, Pipeline};

// Re-export parser types
pub use parser::{
    BackendKind, ParseError, ParseErrorKind, ParseResult, PipelineDefinition, PipelineParser,
    ScheduleConfig, ScheduleParser,
};

// Re-export sweep and caching types
pub use cache::{CacheKey, CachePolicy, Workspace};
pub use matrix::{MatrixError, MatrixExpander, MatrixGrid, MatrixInstance, ParamMatrix};
pub use sweep::{InstanceResult, Sweep};

// Re-export execution types
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use runners::{
    render_serial_script, DryRunBackend, ExecutionBackend, JobOutcome, LocalBackend,
    SlurmBackend, SlurmOptions,
};
pub use schedule::{
    CancelToken, Job, JobId, JobPlan, JobState, PlanError, PlanOptions, RunReport, Scheduler,
    SchedulerConfig,
};
