//! Execution sandbox: the single entry point for running code.
//!
//! The sandbox owns one [`EngineHandle`] per engine kind. A handle couples the
//! adapter (behind an async mutex, so calls to one adapter never overlap) with
//! its lifecycle status and the cancel handle of its current run.
//!
//! Initialization is lazy and happens once per dataset version. Runs are
//! rejected until it completes, and a handle whose backend is bound to an
//! older dataset is rebuilt before it is allowed to run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::config::{BusyPolicy, SandboxConfig};
use crate::dataset::{Dataset, DatasetVersion};
use crate::engine::{
    CancelHandle, EngineAdapter, EngineKind, EngineState, ExecutionResult, RelationalAdapter,
    RunContext, ScriptingAdapter,
};
use crate::error::{InitError, RunError};

/// Snapshot of one handle's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: EngineState,
    /// Dataset version the backend was last initialized against.
    pub bound_version: Option<DatasetVersion>,
    /// Cause of the most recent failed initialization.
    pub last_error: Option<InitError>,
    /// Number of times the adapter was asked to initialize.
    pub initializations: u32,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Uninitialized,
            bound_version: None,
            last_error: None,
            initializations: 0,
        }
    }
}

struct EngineHandle {
    adapter: tokio::sync::Mutex<Box<dyn EngineAdapter>>,
    status: Mutex<EngineStatus>,
    cancel: CancelHandle,
}

impl EngineHandle {
    fn new(adapter: Box<dyn EngineAdapter>) -> Self {
        Self {
            adapter: tokio::sync::Mutex::new(adapter),
            status: Mutex::new(EngineStatus::default()),
            cancel: CancelHandle::new(),
        }
    }

    fn status(&self) -> MutexGuard<'_, EngineStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> EngineStatus {
        self.status().clone()
    }

    fn set_state(&self, state: EngineState) {
        self.status().state = state;
    }

    fn mark_ready(&self, version: DatasetVersion) {
        let mut status = self.status();
        status.state = EngineState::Ready;
        status.bound_version = Some(version);
        status.last_error = None;
        status.initializations += 1;
    }

    fn mark_failed(&self, error: InitError) {
        let mut status = self.status();
        status.state = EngineState::Failed;
        status.bound_version = None;
        status.last_error = Some(error);
        status.initializations += 1;
    }

    fn mark_uninitialized(&self) {
        let mut status = self.status();
        status.state = EngineState::Uninitialized;
        status.bound_version = None;
        status.last_error = None;
    }
}

/// Owns the dataset and both engines for one session.
pub struct Sandbox {
    config: SandboxConfig,
    dataset: RwLock<Arc<Dataset>>,
    handles: FxHashMap<EngineKind, EngineHandle>,
    init_lock: tokio::sync::Mutex<()>,
}

impl Sandbox {
    /// Sandbox with the built-in scripting and relational adapters.
    pub fn new(dataset: Arc<Dataset>, config: SandboxConfig) -> Self {
        let adapters: Vec<Box<dyn EngineAdapter>> = vec![
            Box::new(ScriptingAdapter::new(config.scripting.clone())),
            Box::new(RelationalAdapter::new(config.relational.clone())),
        ];
        Self::with_adapters(dataset, config, adapters)
    }

    /// Sandbox over caller-supplied adapters, keyed by [`EngineAdapter::kind`].
    /// A later adapter of the same kind replaces an earlier one.
    pub fn with_adapters(
        dataset: Arc<Dataset>,
        config: SandboxConfig,
        adapters: impl IntoIterator<Item = Box<dyn EngineAdapter>>,
    ) -> Self {
        let handles = adapters
            .into_iter()
            .map(|adapter| (adapter.kind(), EngineHandle::new(adapter)))
            .collect();
        Self {
            config,
            dataset: RwLock::new(dataset),
            handles,
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The dataset currently installed.
    pub fn dataset(&self) -> Arc<Dataset> {
        Arc::clone(&self.dataset.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Engine kinds this sandbox can run, in dispatch order.
    pub fn kinds(&self) -> impl Iterator<Item = EngineKind> + '_ {
        EngineKind::ALL
            .into_iter()
            .filter(|kind| self.handles.contains_key(kind))
    }

    /// Initialize every adapter that is not ready for the current dataset.
    ///
    /// Concurrent callers queue on one lock, so a second caller waits for the
    /// in-flight initialization and then finds the handles ready. A failing
    /// adapter does not stop the others; the first error is returned. Handles
    /// that already failed report their cached error until [`retry`](Self::retry)
    /// or [`reload`](Self::reload).
    pub async fn ensure_ready(&self) -> Result<(), InitError> {
        let _init = self.init_lock.lock().await;
        let dataset = self.dataset();

        let mut first_error = None;
        for kind in self.kinds() {
            if let Err(e) = self.ready_handle(kind, &dataset).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn ready_handle(
        &self,
        kind: EngineKind,
        dataset: &Arc<Dataset>,
    ) -> Result<(), InitError> {
        let Some(handle) = self.handles.get(&kind) else {
            return Ok(());
        };
        let version = dataset.version();

        let status = handle.snapshot();
        match status.state {
            EngineState::Ready if status.bound_version == Some(version) => return Ok(()),
            EngineState::Failed => {
                let message = status
                    .last_error
                    .map(|e| e.message().to_string())
                    .unwrap_or_default();
                return Err(InitError::Failed { kind, message });
            }
            _ => {}
        }

        handle.set_state(EngineState::Initializing);
        // Waits for a run still in flight against the previous dataset.
        let mut adapter = handle.adapter.lock().await;
        let start = Instant::now();
        match adapter.initialize(Arc::clone(dataset)).await {
            Ok(()) => {
                handle.mark_ready(version);
                tracing::info!(
                    engine = %kind,
                    version = %version,
                    "Engine initialized in {:?}",
                    start.elapsed()
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    engine = %kind,
                    version = %version,
                    "Engine initialization failed: {}",
                    e
                );
                handle.mark_failed(e.clone());
                Err(e)
            }
        }
    }

    /// Run `code` on one engine.
    ///
    /// Every outcome, including a missing or busy engine, is returned as an
    /// [`ExecutionResult`].
    pub async fn execute(&self, kind: EngineKind, code: &str) -> ExecutionResult {
        let Some(handle) = self.handles.get(&kind) else {
            return Err(RunError::NotInitialized);
        };
        match handle.snapshot().state {
            EngineState::Ready => {}
            EngineState::Failed => return Err(RunError::NotReady),
            EngineState::Uninitialized | EngineState::Initializing => {
                return Err(RunError::NotInitialized);
            }
        }

        let mut adapter = match self.config.busy_policy {
            BusyPolicy::Reject => handle.adapter.try_lock().map_err(|_| RunError::Busy)?,
            BusyPolicy::Queue => handle.adapter.lock().await,
        };

        // Cleared before any rebuild so a cancel issued during it still counts.
        handle.cancel.reset();
        let dataset = self.dataset();
        let version = dataset.version();
        if adapter.bound_version() != Some(version) {
            tracing::warn!(
                engine = %kind,
                bound = ?adapter.bound_version(),
                current = %version,
                "Engine not bound to the current dataset, re-initializing"
            );
            if let Err(e) = adapter.initialize(dataset).await {
                tracing::warn!(engine = %kind, "Engine re-initialization failed: {}", e);
                handle.mark_failed(e);
                return Err(RunError::NotReady);
            }
            handle.mark_ready(version);
            if handle.cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
        }

        let ctx = RunContext::new(self.config.run_timeout, handle.cancel.clone());
        let start = Instant::now();
        tracing::debug!(engine = %kind, bytes = code.len(), "Dispatching run");
        let result = adapter.run(code, &ctx).await;
        tracing::debug!(
            engine = %kind,
            ok = result.is_ok(),
            "Run finished in {:?}",
            start.elapsed()
        );
        result
    }

    /// Install a new dataset. Every handle goes back to `Uninitialized`; idle
    /// backends are dropped right away, busy ones when their run ends and the
    /// next initialization rebuilds them.
    pub fn reload(&self, dataset: Arc<Dataset>) {
        let version = dataset.version();
        *self.dataset.write().unwrap_or_else(PoisonError::into_inner) = dataset;

        for handle in self.handles.values() {
            handle.mark_uninitialized();
            if let Ok(mut adapter) = handle.adapter.try_lock() {
                adapter.reset();
            }
        }
        tracing::info!(version = %version, "Dataset reloaded, engines reset");
    }

    /// Cancel in-flight runs and drop every backend.
    pub async fn dispose(&self) {
        for handle in self.handles.values() {
            handle.cancel.cancel();
        }
        for handle in self.handles.values() {
            handle.adapter.lock().await.reset();
            handle.mark_uninitialized();
        }
        tracing::debug!("Sandbox disposed");
    }

    /// Ask the in-flight run of `kind` to stop. Returns whether a run was in
    /// flight.
    pub fn cancel(&self, kind: EngineKind) -> bool {
        let Some(handle) = self.handles.get(&kind) else {
            return false;
        };
        let busy = handle.adapter.try_lock().is_err();
        if busy {
            handle.cancel.cancel();
        }
        busy
    }

    /// Lifecycle snapshot of one engine.
    pub fn status(&self, kind: EngineKind) -> Option<EngineStatus> {
        self.handles.get(&kind).map(EngineHandle::snapshot)
    }

    /// Aggregate state across engines: any failure wins, otherwise the least
    /// advanced handle.
    pub fn state(&self) -> EngineState {
        self.handles
            .values()
            .map(|h| h.snapshot().state)
            .reduce(EngineState::combine)
            .unwrap_or(EngineState::Uninitialized)
    }

    /// Clear a failed handle and initialize it again.
    pub async fn retry(&self, kind: EngineKind) -> Result<(), InitError> {
        let _init = self.init_lock.lock().await;
        if let Some(handle) = self.handles.get(&kind) {
            handle.mark_uninitialized();
        }
        let dataset = self.dataset();
        self.ready_handle(kind, &dataset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Record;

    fn dataset() -> Arc<Dataset> {
        Arc::new(
            Dataset::load(vec![
                Record::new().with("id", 1).with("name", "a"),
                Record::new().with("id", 2).with("name", "b"),
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_execute_before_ready() {
        let sandbox = Sandbox::new(dataset(), SandboxConfig::default());
        assert_eq!(sandbox.state(), EngineState::Uninitialized);
        assert_eq!(
            sandbox.execute(EngineKind::Scripting, "print(1)").await,
            Err(RunError::NotInitialized)
        );
    }

    #[tokio::test]
    async fn test_both_engines_after_ensure_ready() {
        let sandbox = Sandbox::new(dataset(), SandboxConfig::default());
        sandbox.ensure_ready().await.unwrap();
        assert_eq!(sandbox.state(), EngineState::Ready);

        assert_eq!(
            sandbox.execute(EngineKind::Scripting, "print(df.shape[0])").await,
            Ok("2\n".to_string())
        );
        assert_eq!(
            sandbox.execute(EngineKind::Relational, "SELECT * FROM dataset").await,
            Ok("id | name\n----------\n1 | a\n2 | b\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_reload_resets_and_rebinds() {
        let sandbox = Sandbox::new(dataset(), SandboxConfig::default());
        sandbox.ensure_ready().await.unwrap();

        let bigger = Arc::new(
            Dataset::load((0..3).map(|i| Record::new().with("id", i)).collect()).unwrap(),
        );
        sandbox.reload(Arc::clone(&bigger));
        assert_eq!(sandbox.state(), EngineState::Uninitialized);
        assert_eq!(
            sandbox.execute(EngineKind::Relational, "SELECT 1").await,
            Err(RunError::NotInitialized)
        );

        sandbox.ensure_ready().await.unwrap();
        let status = sandbox.status(EngineKind::Relational).unwrap();
        assert_eq!(status.bound_version, Some(bigger.version()));
        assert_eq!(status.initializations, 2);
        assert_eq!(
            sandbox.execute(EngineKind::Relational, "SELECT count(*) AS n FROM dataset").await,
            Ok("n\n--\n3\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_dispose_returns_to_uninitialized() {
        let sandbox = Sandbox::new(dataset(), SandboxConfig::default());
        sandbox.ensure_ready().await.unwrap();
        sandbox.dispose().await;
        assert_eq!(sandbox.state(), EngineState::Uninitialized);
        assert!(!sandbox.cancel(EngineKind::Scripting));
    }
}
