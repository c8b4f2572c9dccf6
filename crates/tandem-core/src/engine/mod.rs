//! Engine adapters for tandem.
//!
//! Two structurally different engines sit behind one capability trait,
//! [`EngineAdapter`]:
//!
//! - **`ScriptingAdapter`** - embedded rhai interpreter with the dataset bound
//!   to `df`; output is whatever the script prints.
//! - **`RelationalAdapter`** - embedded DataFusion context with the dataset
//!   registered as table `dataset`; output is a rendered result table.
//!
//! # Architecture
//!
//! ```text
//! Sandbox
//!     │
//!     └── EngineHandle (one per EngineKind)
//!             │
//!             ├── state: Uninitialized → Initializing → Ready | Failed
//!             │
//!             └── Box<dyn EngineAdapter>
//!                     │
//!                     ├── initialize(Arc<Dataset>)   once per dataset version
//!                     └── run(code, RunContext)      → ExecutionResult
//! ```
//!
//! Adapters are not internally thread-safe; the sandbox serializes all calls
//! to a given adapter.

mod context;
pub mod relational;
pub mod render;
pub mod scripting;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, DatasetVersion};
use crate::error::{InitError, RunError};

pub use context::{CancelHandle, RunContext};
pub use relational::RelationalAdapter;
pub use scripting::ScriptingAdapter;

/// Outcome of one run: captured text, or an error as data.
pub type ExecutionResult = Result<String, RunError>;

/// The two execution paradigms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Scripting,
    Relational,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Scripting, EngineKind::Relational];

    /// Short name used in the CLI and messages.
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Scripting => "script",
            EngineKind::Relational => "sql",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "script" | "scripting" | "rhai" => Ok(EngineKind::Scripting),
            "sql" | "relational" | "query" => Ok(EngineKind::Relational),
            other => Err(format!("unknown engine '{other}' (expected 'script' or 'sql')")),
        }
    }
}

/// Lifecycle of an engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl EngineState {
    fn progress(self) -> u8 {
        match self {
            EngineState::Failed => 0,
            EngineState::Uninitialized => 1,
            EngineState::Initializing => 2,
            EngineState::Ready => 3,
        }
    }

    /// Aggregate of two handle states: any failure wins, otherwise the least
    /// advanced state.
    pub fn combine(self, other: Self) -> Self {
        if self.progress() <= other.progress() { self } else { other }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Ready => "ready",
            EngineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Capability interface implemented by each engine.
#[async_trait]
pub trait EngineAdapter: Send {
    /// Which paradigm this adapter implements.
    fn kind(&self) -> EngineKind;

    /// Provision the engine and bind the dataset.
    ///
    /// Idempotent per dataset version: when the adapter is already bound to
    /// `dataset.version()` this does no work.
    async fn initialize(&mut self, dataset: Arc<Dataset>) -> Result<(), InitError>;

    /// Execute one snippet. Never panics or propagates user errors; every
    /// outcome is an [`ExecutionResult`].
    async fn run(&mut self, code: &str, ctx: &RunContext) -> ExecutionResult;

    /// Dataset version the backend currently holds.
    fn bound_version(&self) -> Option<DatasetVersion>;

    /// Drop the backend. The next `initialize` starts from scratch.
    fn reset(&mut self);
}
