//! Core of the tandem dual-engine execution sandbox.
//!
//! This crate provides:
//! - An immutable in-memory dataset with inferred or declared schema
//! - A scripting engine (rhai) with the dataset bound to `df`
//! - A relational engine (DataFusion) with the dataset registered as `dataset`
//! - The execution sandbox that initializes, serializes and dispatches runs
//! - A session controller holding per-mode code and run history

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod sandbox;
pub mod session;

pub use config::{BusyPolicy, RelationalConfig, SandboxConfig, ScriptLimits, ScriptingConfig};
pub use dataset::{Column, ColumnType, Dataset, DatasetVersion, Record, Value};
pub use engine::{
    CancelHandle, EngineAdapter, EngineKind, EngineState, ExecutionResult, RelationalAdapter,
    RunContext, ScriptingAdapter,
};
pub use error::{Error, InitError, Result, RunError, SchemaError};
pub use sandbox::{EngineStatus, Sandbox};
pub use session::{MAX_HISTORY, RunRecord, Session};
