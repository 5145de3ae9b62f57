//! Error types
//!
//! Configuration problems are detected up front and are never retryable.
//! Solver non-convergence is reported by the backend and passed through
//! unchanged.

use thiserror::Error;

/// Invalid mesh, coefficient or boundary setup
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{what}: expected {expected} component(s), got {actual}")]
    ComponentMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported dimensionality {0} (must be 1, 2 or 3)")]
    UnsupportedDimension(usize),
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),
    #[error("missing mask: {0}")]
    MissingMask(&'static str),
    #[error("{count} degrees of freedom do not fit into the {index_type} index type")]
    IndexOverflow {
        count: i64,
        index_type: &'static str,
    },
    #[error("AMR level {level} out of range (have {num_levels})")]
    LevelOutOfRange { level: usize, num_levels: usize },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the multilevel operator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinOpError {
    #[error("coefficients changed since the last refresh; call update() first")]
    StaleCoefficients,
    #[error("no level entry ({amrlev}, {mglev})")]
    NoSuchLevel { amrlev: usize, mglev: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by a sparse solver backend
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("solver did not converge after {iterations} iterations (residual: {residual:e})")]
    NotConverged { iterations: usize, residual: f64 },
    #[error("row {row} is outside the owned range [{lower}, {upper}]")]
    RowOutOfRange { row: i64, lower: i64, upper: i64 },
    #[error("backend used before {0}")]
    NotReady(&'static str),
    #[error("row ranges do not tile the global system: {0}")]
    BadRange(String),
}

/// Errors raised by the distributed assembler
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssemblerError {
    #[error("operation {operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: crate::assembly::AssemblerState,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors raised while loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
