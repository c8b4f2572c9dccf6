//! Session controller.
//!
//! A [`Session`] is what a front end talks to: one dataset, one sandbox, the
//! selected mode, the code being edited for each mode and a short history of
//! finished runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::dataset::{Column, Dataset, Record};
use crate::engine::{EngineKind, ExecutionResult};
use crate::error::{RunError, SchemaError};
use crate::sandbox::Sandbox;

/// Maximum number of finished runs kept in the history.
pub const MAX_HISTORY: usize = 50;

/// One finished run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub kind: EngineKind,
    pub code: String,
    pub result: ExecutionResult,
    pub elapsed: Duration,
    pub finished_at: SystemTime,
}

pub struct Session {
    id: Uuid,
    sandbox: Arc<Sandbox>,
    mode: EngineKind,
    code: FxHashMap<EngineKind, String>,
    history: VecDeque<RunRecord>,
}

impl Session {
    pub fn new(dataset: Dataset, config: SandboxConfig) -> Self {
        let code = FxHashMap::from_iter([
            (
                EngineKind::Scripting,
                format!(
                    "// Access your data using the variable '{0}'\nprint({0}.head());",
                    config.scripting.binding
                ),
            ),
            (
                EngineKind::Relational,
                format!("SELECT * FROM {} LIMIT 5", config.relational.table_name),
            ),
        ]);
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, version = %dataset.version(), "Session created");

        Self {
            id,
            sandbox: Arc::new(Sandbox::new(Arc::new(dataset), config)),
            mode: EngineKind::Scripting,
            code,
            history: VecDeque::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Validate `rows` and install them as the new dataset. On error the
    /// current dataset stays in place.
    pub fn load(&mut self, rows: Vec<Record>) -> Result<(), SchemaError> {
        let dataset = Dataset::load(rows)?;
        self.load_dataset(dataset);
        Ok(())
    }

    /// Install an already validated dataset.
    pub fn load_dataset(&mut self, dataset: Dataset) {
        self.sandbox.reload(Arc::new(dataset));
    }

    pub fn dataset(&self) -> Arc<Dataset> {
        self.sandbox.dataset()
    }

    pub fn schema(&self) -> Vec<Column> {
        self.sandbox.dataset().schema().to_vec()
    }

    pub fn mode(&self) -> EngineKind {
        self.mode
    }

    pub fn select_mode(&mut self, kind: EngineKind) {
        self.mode = kind;
    }

    pub fn set_code(&mut self, kind: EngineKind, code: impl Into<String>) {
        self.code.insert(kind, code.into());
    }

    pub fn code(&self, kind: EngineKind) -> &str {
        self.code.get(&kind).map(String::as_str).unwrap_or_default()
    }

    /// Run the selected mode's current code.
    pub async fn run(&mut self) -> ExecutionResult {
        let kind = self.mode;
        let code = self.code(kind).to_string();
        self.run_code(kind, &code).await
    }

    /// Run `code` on `kind`, initializing the engines first if needed.
    ///
    /// An initialization failure is reported as this run's error.
    pub async fn run_code(&mut self, kind: EngineKind, code: &str) -> ExecutionResult {
        let start = Instant::now();
        let result = match self.sandbox.ensure_ready().await {
            Ok(()) => self.sandbox.execute(kind, code).await,
            // The other engine may have come up fine.
            Err(e) if e.kind() != kind => self.sandbox.execute(kind, code).await,
            Err(e) => Err(RunError::Execution(e.to_string())),
        };

        self.record(RunRecord {
            kind,
            code: code.to_string(),
            result: result.clone(),
            elapsed: start.elapsed(),
            finished_at: SystemTime::now(),
        });
        result
    }

    fn record(&mut self, entry: RunRecord) {
        if self.history.len() >= MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    /// Finished runs, oldest first.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &RunRecord> {
        self.history.iter()
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }
}
