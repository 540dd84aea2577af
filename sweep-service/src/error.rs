// Service Errors
// Umbrella error type for callers that drive the whole sweep workflow

use crate::cache::CacheError;
use crate::matrix::MatrixError;
use crate::node::ResultError;
use crate::params::ParamError;
use crate::parser::ParseError;
use crate::pipeline::GraphError;
use crate::schedule::PlanError;

use thiserror::Error;

/// Any error raised by the sweep service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Result(#[from] ResultError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
