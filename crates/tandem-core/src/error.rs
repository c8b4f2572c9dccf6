//! Error types for tandem-core.
//!
//! Only [`SchemaError`] and [`InitError`] abort a higher-level operation.
//! Everything that goes wrong inside a single run is a [`RunError`] and is
//! returned as data in an [`ExecutionResult`](crate::engine::ExecutionResult).

use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineKind;

/// Result type for tandem-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A dataset load was rejected. No partial dataset is ever installed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// No rows were supplied, so no columns can be inferred.
    #[error("dataset is empty: no columns can be inferred")]
    Empty,

    /// A record's key set differs from the first record's.
    #[error("row {row} has inconsistent columns: expected [{expected}], found [{found}]")]
    InconsistentKeys {
        row: usize,
        expected: String,
        found: String,
    },

    /// A declared schema names the same column twice.
    #[error("column '{0}' is declared more than once")]
    DuplicateColumn(String),

    /// A value does not fit the declared type of its column.
    #[error("row {row}, column '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        row: usize,
        column: String,
        expected: String,
        found: String,
    },

    /// A declared type name could not be understood.
    #[error("unknown column type '{0}'")]
    UnknownType(String),

    /// The ingestion payload was not valid JSON rows.
    #[error("invalid dataset payload: {0}")]
    Payload(String),
}

/// An engine adapter failed to provision its backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InitError {
    /// The engine runtime could not be set up.
    #[error("{kind} engine failed to start: {message}")]
    Runtime { kind: EngineKind, message: String },

    /// The dataset could not be converted into the engine's native structure.
    #[error("{kind} engine could not load the dataset: {message}")]
    DatasetConversion { kind: EngineKind, message: String },

    /// Initialization already failed for this dataset version and is not
    /// retried automatically.
    #[error("{kind} engine is in a failed state: {message}")]
    Failed { kind: EngineKind, message: String },
}

impl InitError {
    /// The engine this error belongs to.
    pub fn kind(&self) -> EngineKind {
        match self {
            InitError::Runtime { kind, .. }
            | InitError::DatasetConversion { kind, .. }
            | InitError::Failed { kind, .. } => *kind,
        }
    }

    /// Diagnostic text without the engine prefix.
    pub fn message(&self) -> &str {
        match self {
            InitError::Runtime { message, .. }
            | InitError::DatasetConversion { message, .. }
            | InitError::Failed { message, .. } => message,
        }
    }
}

/// Failure of a single run. Stable kinds plus an opaque engine diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// `ensure_ready` has not completed for the adapter.
    #[error("not initialized")]
    NotInitialized,

    /// The adapter failed to initialize (or lost its backend).
    #[error("engine not ready")]
    NotReady,

    /// Another run on the same adapter is still in flight.
    #[error("busy")]
    Busy,

    /// The user code or query raised an error; the engine's text verbatim.
    #[error("{0}")]
    Execution(String),

    /// The run exceeded its deadline.
    #[error("execution timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// The run was cancelled through its cancel handle.
    #[error("execution cancelled")]
    Cancelled,
}

/// Errors that can occur in tandem-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Dataset load rejected.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Engine initialization failed.
    #[error("initialization error: {0}")]
    Init(#[from] InitError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_error_messages_are_stable() {
        assert_eq!(RunError::NotInitialized.to_string(), "not initialized");
        assert_eq!(RunError::NotReady.to_string(), "engine not ready");
        assert_eq!(RunError::Busy.to_string(), "busy");
        assert_eq!(
            RunError::TimedOut(Duration::from_millis(250)).to_string(),
            "execution timed out after 250ms"
        );
    }

    #[test]
    fn test_execution_error_is_verbatim() {
        let err = RunError::Execution("Division by zero: 1 / 0".into());
        assert_eq!(err.to_string(), "Division by zero: 1 / 0");
    }

    #[test]
    fn test_init_error_accessors() {
        let err = InitError::Runtime {
            kind: EngineKind::Relational,
            message: "boom".into(),
        };
        assert_eq!(err.kind(), EngineKind::Relational);
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "sql engine failed to start: boom");
    }
}
