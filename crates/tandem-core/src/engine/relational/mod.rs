//! Relational engine adapter.
//!
//! Each dataset version gets a fresh DataFusion [`SessionContext`] with the
//! rows registered as one in-memory table. Queries run with DDL and DML
//! disabled, so the table always matches the loaded dataset.
//!
//! Unquoted identifiers are matched exactly as written, so a column shown as
//! `Revenue` in the schema is queried as `SELECT Revenue FROM dataset`.
//!
//! Each query executes on its own task. The run waits on that task, the
//! deadline and the cancel signal, and aborts the task when either of the
//! latter fires, so a plan that hogs its worker thread cannot hold the
//! adapter.

mod batch;

use std::future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::array_value_to_string;
use datafusion::datasource::MemTable;
use datafusion::error::DataFusionError;
use datafusion::execution::context::SQLOptions;
use datafusion::prelude::{SessionConfig, SessionContext};
use tokio::task::JoinHandle;

use super::render::{NO_RESULTS, render_table};
use super::{EngineAdapter, EngineKind, ExecutionResult, RunContext};
use crate::config::RelationalConfig;
use crate::dataset::{Dataset, DatasetVersion};
use crate::error::{InitError, RunError};

pub use batch::{arrow_schema, arrow_type, to_record_batch};

/// Adapter for the embedded query engine.
pub struct RelationalAdapter {
    config: RelationalConfig,
    context: Option<SessionContext>,
    bound: Option<DatasetVersion>,
}

impl RelationalAdapter {
    pub fn new(config: RelationalConfig) -> Self {
        Self {
            config,
            context: None,
            bound: None,
        }
    }

    /// Name of the table queries read from.
    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    fn sql_options(&self) -> SQLOptions {
        SQLOptions::new()
            .with_allow_ddl(self.config.allow_ddl)
            .with_allow_dml(self.config.allow_dml)
    }

    fn build_context(&self, dataset: &Dataset) -> Result<SessionContext, InitError> {
        let batch = to_record_batch(dataset).map_err(|e| InitError::DatasetConversion {
            kind: EngineKind::Relational,
            message: e.to_string(),
        })?;
        let runtime_error = |e: DataFusionError| InitError::Runtime {
            kind: EngineKind::Relational,
            message: e.to_string(),
        };

        let table = MemTable::try_new(batch.schema(), vec![vec![batch]]).map_err(runtime_error)?;
        let mut config = SessionConfig::new().with_target_partitions(1);
        config.options_mut().sql_parser.enable_ident_normalization = false;
        let ctx = SessionContext::new_with_config(config);
        ctx.register_table(self.config.table_name.as_str(), Arc::new(table))
            .map_err(runtime_error)?;
        Ok(ctx)
    }

    #[cfg(test)]
    fn session_id(&self) -> Option<String> {
        self.context.as_ref().map(SessionContext::session_id)
    }
}

impl Default for RelationalAdapter {
    fn default() -> Self {
        Self::new(RelationalConfig::default())
    }
}

#[async_trait]
impl EngineAdapter for RelationalAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Relational
    }

    async fn initialize(&mut self, dataset: Arc<Dataset>) -> Result<(), InitError> {
        let version = dataset.version();
        if self.context.is_some() && self.bound == Some(version) {
            return Ok(());
        }

        self.reset();
        let start = Instant::now();
        let ctx = self.build_context(&dataset)?;
        self.context = Some(ctx);
        self.bound = Some(version);
        tracing::info!(
            version = %version,
            table = %self.config.table_name,
            rows = dataset.len(),
            "Relational engine ready in {:?}",
            start.elapsed()
        );
        Ok(())
    }

    async fn run(&mut self, code: &str, ctx: &RunContext) -> ExecutionResult {
        let Some(session) = self.context.as_ref() else {
            return Err(RunError::NotReady);
        };
        if is_blank_statement(code) {
            return Ok(String::new());
        }
        if let Some(reason) = ctx.interruption() {
            return Err(reason);
        }

        let session = session.clone();
        let options = self.sql_options();
        let code = code.to_string();
        let mut query = AbortOnDrop(tokio::spawn(async move {
            let frame = session.sql_with_options(&code, options).await?;
            frame.collect().await
        }));

        let batches = tokio::select! {
            joined = &mut query.0 => joined
                .map_err(|e| RunError::Execution(format!("query task failed: {e}")))?
                .map_err(|e| RunError::Execution(e.to_string()))?,
            _ = ctx.cancel_handle().cancelled() => return Err(RunError::Cancelled),
            _ = expire(ctx.remaining()) => {
                tracing::debug!("Query deadline reached, aborting");
                return Err(ctx.timeout_error());
            }
        };

        render_batches(&batches)
    }

    fn bound_version(&self) -> Option<DatasetVersion> {
        self.context.as_ref().and(self.bound)
    }

    fn reset(&mut self) {
        self.context = None;
        self.bound = None;
    }
}

/// Aborts the query task when the run returns or is dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn is_blank_statement(code: &str) -> bool {
    code.chars().all(|c| c.is_whitespace() || c == ';')
}

async fn expire(remaining: Option<Duration>) {
    match remaining {
        Some(left) => tokio::time::sleep(left).await,
        None => future::pending().await,
    }
}

fn render_batches(batches: &[RecordBatch]) -> ExecutionResult {
    let total: usize = batches.iter().map(RecordBatch::num_rows).sum();
    let Some(first) = batches.first().filter(|_| total > 0) else {
        return Ok(NO_RESULTS.to_string());
    };

    let schema = first.schema();
    let headers: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();

    let mut rows = Vec::with_capacity(total);
    for batch in batches {
        for row in 0..batch.num_rows() {
            let cells = batch
                .columns()
                .iter()
                .map(|column| array_value_to_string(column, row))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RunError::Execution(e.to_string()))?;
            rows.push(cells);
        }
    }

    Ok(render_table(&headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Record, Value};
    use crate::engine::CancelHandle;

    fn dataset() -> Arc<Dataset> {
        Arc::new(
            Dataset::load(vec![
                Record::new().with("id", 1).with("name", "a"),
                Record::new().with("id", 2).with("name", "b"),
            ])
            .unwrap(),
        )
    }

    async fn ready_adapter() -> RelationalAdapter {
        let mut adapter = RelationalAdapter::default();
        adapter.initialize(dataset()).await.unwrap();
        adapter
    }

    fn ctx() -> RunContext {
        RunContext::default()
    }

    #[tokio::test]
    async fn test_select_all_round_trip() {
        let mut adapter = ready_adapter().await;
        assert_eq!(
            adapter.run("SELECT * FROM dataset", &ctx()).await,
            Ok("id | name\n----------\n1 | a\n2 | b\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_zero_rows_and_empty_statement() {
        let mut adapter = ready_adapter().await;
        assert_eq!(
            adapter.run("SELECT * FROM dataset WHERE id > 10", &ctx()).await,
            Ok(NO_RESULTS.to_string())
        );
        assert_eq!(adapter.run("", &ctx()).await, Ok(String::new()));
        assert_eq!(adapter.run("  ; \n", &ctx()).await, Ok(String::new()));
    }

    #[tokio::test]
    async fn test_missing_table_reports_engine_message() {
        let mut adapter = ready_adapter().await;
        match adapter.run("SELECT * FROM missing_table", &ctx()).await {
            Err(RunError::Execution(msg)) => {
                assert!(msg.contains("missing_table"), "{msg}");
                assert!(msg.contains("not found"), "{msg}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // The engine stays usable.
        assert!(adapter.run("SELECT id FROM dataset", &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_column_and_syntax_errors() {
        let mut adapter = ready_adapter().await;
        assert!(matches!(
            adapter.run("SELECT nope FROM dataset", &ctx()).await,
            Err(RunError::Execution(_))
        ));
        assert!(matches!(
            adapter.run("SELEC id FROM", &ctx()).await,
            Err(RunError::Execution(_))
        ));
    }

    #[tokio::test]
    async fn test_aggregate_header_width() {
        let mut adapter = ready_adapter().await;
        assert_eq!(
            adapter.run("SELECT count(*) AS n FROM dataset", &ctx()).await,
            Ok("n\n--\n2\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_nulls_render_empty() {
        let ds = Arc::new(
            Dataset::load(vec![
                Record::new().with("k", 1).with("v", 2.5),
                Record::new().with("k", 2).with("v", Value::Null),
            ])
            .unwrap(),
        );
        let mut adapter = RelationalAdapter::default();
        adapter.initialize(ds).await.unwrap();
        assert_eq!(
            adapter.run("SELECT k, v FROM dataset ORDER BY k", &ctx()).await,
            Ok("k | v\n------\n1 | 2.5\n2 | \n".to_string())
        );
    }

    #[tokio::test]
    async fn test_table_is_read_only() {
        let mut adapter = ready_adapter().await;
        assert!(adapter.run("DROP TABLE dataset", &ctx()).await.is_err());
        assert!(adapter.run("CREATE TABLE t (a INT)", &ctx()).await.is_err());
        assert!(adapter.run("SELECT * FROM dataset", &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_before_initialize_is_not_ready() {
        let mut adapter = RelationalAdapter::default();
        assert_eq!(adapter.run("SELECT 1", &ctx()).await, Err(RunError::NotReady));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_per_version() {
        let ds = dataset();
        let mut adapter = RelationalAdapter::default();
        adapter.initialize(Arc::clone(&ds)).await.unwrap();
        let first = adapter.session_id();
        adapter.initialize(Arc::clone(&ds)).await.unwrap();
        assert_eq!(adapter.session_id(), first);

        adapter.initialize(dataset()).await.unwrap();
        assert_ne!(adapter.session_id(), first);
    }

    #[tokio::test]
    async fn test_interrupted_before_start() {
        let mut adapter = ready_adapter().await;

        let cancel = CancelHandle::new();
        cancel.cancel();
        let cancelled = RunContext::new(None, cancel);
        assert_eq!(adapter.run("SELECT 1", &cancelled).await, Err(RunError::Cancelled));

        let expired = RunContext::new(Some(Duration::ZERO), CancelHandle::new());
        assert_eq!(
            adapter.run("SELECT 1", &expired).await,
            Err(RunError::TimedOut(Duration::ZERO))
        );
    }

    const CUBE_JOIN: &str = "SELECT count(*) FROM dataset a CROSS JOIN dataset b \
         CROSS JOIN dataset c WHERE a.id + b.id + c.id = -1";

    async fn numbered_adapter(rows: i64) -> RelationalAdapter {
        let records = (0..rows).map(|i| Record::new().with("id", i)).collect();
        let mut adapter = RelationalAdapter::default();
        adapter.initialize(Arc::new(Dataset::load(records).unwrap())).await.unwrap();
        adapter
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_long_query_times_out_mid_run() {
        let mut adapter = numbered_adapter(300).await;
        let budget = Duration::from_millis(20);

        let start = Instant::now();
        let timed = RunContext::new(Some(budget), CancelHandle::new());
        assert_eq!(adapter.run(CUBE_JOIN, &timed).await, Err(RunError::TimedOut(budget)));
        assert!(start.elapsed() < Duration::from_secs(5), "{:?}", start.elapsed());

        assert_eq!(
            adapter.run("SELECT count(*) AS n FROM dataset", &ctx()).await,
            Ok("n\n--\n300\n".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_long_query_cancelled_mid_run() {
        let mut adapter = numbered_adapter(300).await;
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let run = RunContext::new(None, cancel);
        assert_eq!(adapter.run(CUBE_JOIN, &run).await, Err(RunError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5), "{:?}", start.elapsed());
    }

    #[tokio::test]
    async fn test_mixed_case_columns_match_as_written() {
        let ds = Arc::new(
            Dataset::load(vec![
                Record::new().with("Revenue", 10).with("city", "Oslo"),
                Record::new().with("Revenue", 20).with("city", "Lima"),
            ])
            .unwrap(),
        );
        let mut adapter = RelationalAdapter::default();
        adapter.initialize(ds).await.unwrap();

        assert_eq!(
            adapter.run("SELECT Revenue FROM dataset WHERE city = 'Lima'", &ctx()).await,
            Ok("Revenue\n--------\n20\n".to_string())
        );
        assert_eq!(
            adapter.run("SELECT \"Revenue\", city FROM dataset WHERE Revenue > 15", &ctx()).await,
            Ok("Revenue | city\n---------------\n20 | Lima\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_custom_table_name() {
        let config = RelationalConfig {
            table_name: "sales".to_string(),
            ..Default::default()
        };
        let mut adapter = RelationalAdapter::new(config);
        adapter.initialize(dataset()).await.unwrap();
        assert_eq!(
            adapter.run("SELECT name FROM sales WHERE id = 2", &ctx()).await,
            Ok("name\n-----\nb\n".to_string())
        );
    }
}
