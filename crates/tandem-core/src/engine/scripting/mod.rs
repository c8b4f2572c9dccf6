//! Scripting engine adapter.
//!
//! Wraps an embedded rhai interpreter. The dataset is converted once into a
//! [`Frame`] and bound as a constant (`df` by default); scripts see it through
//! the `DataFrame` API registered in [`frame`]. Whatever a script prints is
//! the run's output.
//!
//! The interpreter is synchronous, so runs are moved onto the blocking pool:
//! the runtime is taken out of the adapter, executed on a worker thread and
//! handed back when the worker finishes.

mod capture;
mod frame;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};

use super::{EngineAdapter, EngineKind, ExecutionResult, RunContext};
use crate::config::{ScriptLimits, ScriptingConfig};
use crate::dataset::{Dataset, DatasetVersion};
use crate::error::{InitError, RunError};

pub use capture::OutputCapture;
pub use frame::{Frame, register_frame_api};

/// Operations between two deadline/cancellation checks.
const PROGRESS_CHECK_INTERVAL: u64 = 1024;

/// Context of the run currently executing, read by the progress hook.
type ActiveRun = Arc<Mutex<Option<RunContext>>>;

/// Adapter for the embedded scripting interpreter.
pub struct ScriptingAdapter {
    config: ScriptingConfig,
    runtime: Option<ScriptRuntime>,
    bound: Option<DatasetVersion>,
}

/// Interpreter, scope and hooks for one dataset version.
struct ScriptRuntime {
    engine: Engine,
    scope: Scope<'static>,
    capture: OutputCapture,
    active: ActiveRun,
}

impl ScriptingAdapter {
    pub fn new(config: ScriptingConfig) -> Self {
        Self {
            config,
            runtime: None,
            bound: None,
        }
    }

    /// Variable name the dataset is bound to.
    pub fn binding(&self) -> &str {
        &self.config.binding
    }
}

impl Default for ScriptingAdapter {
    fn default() -> Self {
        Self::new(ScriptingConfig::default())
    }
}

#[async_trait]
impl EngineAdapter for ScriptingAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Scripting
    }

    async fn initialize(&mut self, dataset: Arc<Dataset>) -> Result<(), InitError> {
        let version = dataset.version();
        if self.runtime.is_some() && self.bound == Some(version) {
            return Ok(());
        }

        self.reset();
        let config = self.config.clone();
        let runtime = tokio::task::spawn_blocking(move || ScriptRuntime::build(&config, &dataset))
            .await
            .map_err(|e| InitError::Runtime {
                kind: EngineKind::Scripting,
                message: e.to_string(),
            })??;

        self.runtime = Some(runtime);
        self.bound = Some(version);
        tracing::info!(
            version = %version,
            binding = %self.config.binding,
            "Scripting engine ready"
        );
        Ok(())
    }

    async fn run(&mut self, code: &str, ctx: &RunContext) -> ExecutionResult {
        let Some(mut runtime) = self.runtime.take() else {
            return Err(RunError::NotReady);
        };
        if code.trim().is_empty() {
            self.runtime = Some(runtime);
            return Ok(String::new());
        }

        let code = code.to_string();
        let ctx = ctx.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = runtime.execute(&code, &ctx);
            (runtime, result)
        })
        .await;

        match outcome {
            Ok((runtime, result)) => {
                self.runtime = Some(runtime);
                result
            }
            Err(e) => {
                // The runtime was dropped with the worker.
                self.bound = None;
                tracing::error!("Scripting worker failed: {}", e);
                Err(RunError::Execution(format!("scripting engine crashed: {e}")))
            }
        }
    }

    fn bound_version(&self) -> Option<DatasetVersion> {
        self.runtime.as_ref().and(self.bound)
    }

    fn reset(&mut self) {
        self.runtime = None;
        self.bound = None;
    }
}

impl ScriptRuntime {
    fn build(config: &ScriptingConfig, dataset: &Dataset) -> Result<Self, InitError> {
        if !is_identifier(&config.binding) {
            return Err(InitError::Runtime {
                kind: EngineKind::Scripting,
                message: format!("'{}' is not a valid variable name", config.binding),
            });
        }

        let capture = OutputCapture::new();
        let active: ActiveRun = Arc::new(Mutex::new(None));

        let mut engine = Engine::new();
        apply_limits(&mut engine, &config.limits);
        engine.set_module_resolver(DummyModuleResolver::new());
        register_frame_api(&mut engine);

        let sink = capture.clone();
        engine.on_print(move |text| sink.write_line(text));
        let sink = capture.clone();
        engine.on_debug(move |text, _source, _pos| sink.write_line(text));

        let watched = Arc::clone(&active);
        engine.on_progress(move |ops| {
            if ops % PROGRESS_CHECK_INTERVAL != 0 {
                return None;
            }
            let guard = watched.lock().unwrap_or_else(PoisonError::into_inner);
            guard
                .as_ref()
                .and_then(RunContext::interruption)
                .map(|reason| Dynamic::from(reason.to_string()))
        });

        let mut scope = Scope::new();
        scope.push_constant(config.binding.clone(), Frame::from_dataset(dataset));

        Ok(Self {
            engine,
            scope,
            capture,
            active,
        })
    }

    /// Run one snippet with output capture armed for exactly its duration.
    fn execute(&mut self, code: &str, ctx: &RunContext) -> ExecutionResult {
        self.set_active(Some(ctx.clone()));
        self.capture.arm();

        let outcome = self.engine.run_with_scope(&mut self.scope, code);

        let output = self.capture.take();
        self.set_active(None);

        match outcome {
            Ok(()) => Ok(output),
            Err(err) => Err(classify(&err, ctx)),
        }
    }

    fn set_active(&self, run: Option<RunContext>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = run;
    }
}

fn apply_limits(engine: &mut Engine, limits: &ScriptLimits) {
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    for symbol in &limits.disabled_symbols {
        engine.disable_symbol(symbol.as_str());
    }
}

/// Map an interpreter error onto the run taxonomy.
fn classify(err: &EvalAltResult, ctx: &RunContext) -> RunError {
    match err.unwrap_inner() {
        EvalAltResult::ErrorTerminated(..) => ctx
            .interruption()
            .unwrap_or_else(|| RunError::Execution(err.to_string())),
        _ => RunError::Execution(err.to_string()),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
