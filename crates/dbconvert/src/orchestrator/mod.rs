//! Conversion orchestrator - main workflow coordinator.
//!
//! A run moves through `Idle → FetchingSchema → Mapping → GeneratingScripts
//! → ExecutingSchema → TransferringData → Completed | Canceled | Failed`,
//! skipping the optional phases the options do not ask for. The run lives on
//! its own task; the caller keeps a [`ConversionHandle`] to subscribe to
//! feedback, cancel, and await the [`ConversionResult`].

mod handle;
mod result;

pub use handle::{ConversionHandle, ConversionState};
pub use result::{ConversionResult, EndpointHealth, HealthCheckResult, OutcomeKind};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{
    Config, ConnectionConfig, ConversionOption, LoggingConfig, SchemaSelection,
};
use crate::core::catalog::DriverCatalog;
use crate::core::schema::{ObjectKind, ObjectName, ObjectRef, Table};
use crate::core::traits::{DatabaseInterpreter, ReadOptions};
use crate::error::{ConvertError, Result};
use crate::feedback::{FeedbackEvent, FeedbackHub, Severity};
use crate::mapping::{MappedSchema, MappingOptions, SchemaMapper};
use crate::script::{ScriptGenerator, ScriptOutput, ScriptPlan, ScriptUnit};
use crate::transfer::{TransferConfig, TransferEngine, TransferJob};

/// Everything one conversion needs, passed in explicitly.
#[derive(Clone)]
pub struct ConversionSession {
    pub source: ConnectionConfig,
    pub target: ConnectionConfig,
    pub selection: SchemaSelection,
    pub options: ConversionOption,
    pub logging: LoggingConfig,
    pub catalog: Arc<DriverCatalog>,
}

impl ConversionSession {
    /// A session using the built-in engines.
    pub fn new(
        source: ConnectionConfig,
        target: ConnectionConfig,
        selection: SchemaSelection,
        options: ConversionOption,
    ) -> Self {
        Self {
            source,
            target,
            selection,
            options,
            logging: LoggingConfig::default(),
            catalog: Arc::new(DriverCatalog::with_builtins()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            source: config.source.clone(),
            target: config.target.clone(),
            selection: config.selection.clone(),
            options: config.conversion.clone(),
            logging: config.logging.clone(),
            catalog: Arc::new(DriverCatalog::with_builtins()),
        }
    }

    /// Use a different engine registry.
    pub fn with_catalog(mut self, catalog: Arc<DriverCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    fn to_config(&self) -> Config {
        Config {
            source: self.source.clone(),
            target: self.target.clone(),
            selection: self.selection.clone(),
            conversion: self.options.clone(),
            logging: self.logging.clone(),
        }
    }
}

impl std::fmt::Debug for ConversionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionSession")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("selection", &self.selection)
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    objects_scripted: usize,
    objects_skipped: usize,
    tables_transferred: usize,
    tables_failed: usize,
    rows_transferred: u64,
    /// An abort-level failure stopped the data phase.
    aborted: bool,
    scripts: Vec<String>,
}

/// Runs one conversion.
pub struct Orchestrator {
    session: ConversionSession,
    feedback: Arc<FeedbackHub>,
    cancel: CancellationToken,
    state: watch::Sender<ConversionState>,
    run_id: String,
}

impl Orchestrator {
    /// Start a conversion on a new task and return its handle immediately.
    pub fn start(session: ConversionSession) -> ConversionHandle {
        let feedback = Arc::new(FeedbackHub::new(session.logging.clone()));
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConversionState::Idle);
        let run_id = uuid::Uuid::new_v4().to_string();

        let orchestrator = Orchestrator {
            session,
            feedback: feedback.clone(),
            cancel: cancel.clone(),
            state: state_tx,
            run_id: run_id.clone(),
        };
        let task = tokio::spawn(orchestrator.run());

        ConversionHandle {
            feedback,
            cancel,
            state: state_rx,
            task,
            run_id,
        }
    }

    /// Connect to both sides and run a trivial query on each.
    pub async fn health_check(session: &ConversionSession) -> HealthCheckResult {
        let (source, target) = tokio::join!(
            Self::check_endpoint(&session.catalog, &session.source),
            Self::check_endpoint(&session.catalog, &session.target)
        );
        let healthy = source.connected && target.connected;
        HealthCheckResult {
            source,
            target,
            healthy,
        }
    }

    async fn check_endpoint(catalog: &DriverCatalog, config: &ConnectionConfig) -> EndpointHealth {
        let start = Instant::now();
        let result = async {
            let interpreter = catalog.connect(config, 1).await?;
            let ping = interpreter.ping().await;
            interpreter.close().await;
            ping
        }
        .await;
        EndpointHealth {
            engine: config.engine.clone(),
            endpoint: config.describe(),
            connected: result.is_ok(),
            latency_ms: start.elapsed().as_millis() as u64,
            error: result.err().map(|e| e.to_string()),
        }
    }

    async fn run(self) -> ConversionResult {
        let started_at = Utc::now();
        info!(
            "Starting conversion run {}: {} -> {}",
            self.run_id,
            self.session.source.describe(),
            self.session.target.describe()
        );

        let mut counters = RunCounters::default();
        let outcome = self.execute(&mut counters).await;
        self.finish(started_at, counters, outcome)
    }

    fn transition(&self, state: ConversionState, message: &str) {
        self.state.send_replace(state);
        info!("{}", message);
        self.feedback.publish(FeedbackEvent::info(message));
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ConvertError::Canceled)
        } else {
            Ok(())
        }
    }

    async fn execute(&self, c: &mut RunCounters) -> Result<()> {
        self.check_cancel()?;
        let session = &self.session;
        let opts = &session.options;
        session.to_config().validate_with(&session.catalog)?;

        self.transition(ConversionState::FetchingSchema, "Phase 1: fetching schema");
        let max_connections = opts.get_workers() + 1;
        let needs_target = opts.execute_on_target || opts.skip_existing_objects;
        let (source, target) = if needs_target {
            let (s, t) = tokio::join!(
                session.catalog.connect(&session.source, max_connections),
                session.catalog.connect(&session.target, max_connections)
            );
            match (s, t) {
                (Ok(s), Ok(t)) => (s, Some(t)),
                (Ok(connected), Err(e)) | (Err(e), Ok(connected)) => {
                    connected.close().await;
                    return Err(e);
                }
                (Err(e), Err(_)) => return Err(e),
            }
        } else {
            (session.catalog.connect(&session.source, max_connections).await?, None)
        };

        let result = self.convert(&source, target.as_ref(), c).await;

        source.close().await;
        if let Some(target) = &target {
            target.close().await;
        }
        result
    }

    async fn convert(
        &self,
        source: &Arc<dyn DatabaseInterpreter>,
        target: Option<&Arc<dyn DatabaseInterpreter>>,
        c: &mut RunCounters,
    ) -> Result<()> {
        let session = &self.session;
        let opts = &session.options;
        let target_dialect = match target {
            Some(t) => t.dialect(),
            None => session.catalog.dialect_for(&session.target)?,
        };

        let (introspection, existing) = match target.filter(|_| opts.skip_existing_objects) {
            Some(t) => {
                let everything = SchemaSelection::default();
                let (s, t) = tokio::try_join!(
                    source.introspect(&session.selection),
                    t.introspect(&everything)
                )?;
                (s, existing_objects(&t.schema))
            }
            None => (source.introspect(&session.selection).await?, Vec::new()),
        };
        for issue in &introspection.issues {
            self.feedback.report(issue);
            c.objects_skipped += 1;
        }
        info!(
            "Found {} tables, {} views, {} routines",
            introspection.schema.tables.len(),
            introspection.schema.views.len(),
            introspection.schema.functions.len() + introspection.schema.procedures.len()
        );

        self.check_cancel()?;
        self.transition(ConversionState::Mapping, "Phase 2: mapping types and identifiers");
        let mapped = SchemaMapper::new(source.dialect(), target_dialect.clone(), MappingOptions::from(opts))
            .map(introspection.schema)?;
        for event in &mapped.events {
            self.feedback.publish(event.clone());
        }
        c.objects_skipped += mapped.skipped;

        self.check_cancel()?;
        self.transition(ConversionState::GeneratingScripts, "Phase 3: generating scripts");
        let plan = ScriptGenerator::new(target_dialect.clone(), opts.script_options())
            .with_existing(existing)
            .generate(&mapped.target);
        for event in &plan.events {
            self.feedback.publish(event.clone());
        }
        c.objects_skipped += plan.skipped;

        let output = Arc::new(ScriptOutput::open(&opts.output, target_dialect.batch_separator())?);
        let executor = target.filter(|_| opts.execute_on_target);
        let schema_scope = opts.scope.includes_schema();
        let data_phase = opts.scope.includes_data() && (executor.is_some() || output.is_enabled());

        if schema_scope {
            for unit in &plan.units {
                output.emit(unit)?;
            }
            c.objects_scripted = plan.object_count();
            if !data_phase {
                for unit in &plan.deferred {
                    output.emit(unit)?;
                }
            }
            info!("Generated {} script units", c.objects_scripted);
        }

        if let Some(t) = executor.filter(|_| schema_scope) {
            self.check_cancel()?;
            self.transition(ConversionState::ExecutingSchema, "Phase 4: executing schema on target");
            self.execute_units(t, &plan.units).await?;
            if !data_phase {
                self.execute_units(t, &plan.deferred).await?;
            }
        }

        if data_phase {
            self.check_cancel()?;
            self.transition(ConversionState::TransferringData, "Phase 5: transferring data");
            self.transfer(source, executor, &mapped, &plan, output.clone(), c).await;
            if self.cancel.is_cancelled() || c.aborted {
                // Keep what was scripted before the stop.
                c.scripts = output.finish()?;
                return if self.cancel.is_cancelled() {
                    Err(ConvertError::Canceled)
                } else {
                    Ok(())
                };
            }
            if schema_scope {
                for unit in &plan.deferred {
                    output.emit(unit)?;
                }
                if let Some(t) = executor {
                    self.execute_units(t, &plan.deferred).await?;
                }
            }
        }

        c.scripts = output.finish()?;
        Ok(())
    }

    /// Run script units on one target session, in order.
    async fn execute_units(&self, target: &Arc<dyn DatabaseInterpreter>, units: &[ScriptUnit]) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let mut session = target.session().await?;
        for unit in units {
            self.check_cancel()?;
            for statement in &unit.statements {
                if let Err(e) = session.execute(statement).await {
                    let err = ConvertError::query(
                        target.engine(),
                        format!("Failed to create {} {}: {}", unit.kind, unit.name, e),
                    );
                    if !self.session.options.continue_on_error {
                        return Err(err);
                    }
                    self.feedback
                        .publish(FeedbackEvent::from_error(&err).with_object(unit.name.clone()));
                    break;
                }
            }
            debug!("Created {} {}", unit.kind, unit.name);
        }
        Ok(())
    }

    async fn transfer(
        &self,
        source: &Arc<dyn DatabaseInterpreter>,
        target: Option<&Arc<dyn DatabaseInterpreter>>,
        mapped: &MappedSchema,
        plan: &ScriptPlan,
        output: Arc<ScriptOutput>,
        c: &mut RunCounters,
    ) {
        let opts = &self.session.options;
        let pairs: HashMap<ObjectName, (&Table, &Table)> = mapped
            .table_pairs()
            .map(|(s, t)| (t.object_name(), (s, t)))
            .collect();

        let levels: Vec<Vec<TransferJob>> = plan
            .order
            .table_levels
            .iter()
            .map(|level| {
                level
                    .iter()
                    .filter_map(|name| {
                        let (source, target) = pairs.get(name)?;
                        let rank = plan
                            .order
                            .rank_of(&ObjectRef::new(ObjectKind::Table, name.clone()))
                            .unwrap_or(0);
                        Some(TransferJob::new(source, target, rank))
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|level| !level.is_empty())
            .collect();

        let config = TransferConfig {
            batch_size: opts.batch_size,
            use_transaction: opts.use_transaction,
            continue_on_error: opts.continue_on_error,
            read_options: ReadOptions {
                treat_unreadable_bytes_as_null: opts.treat_unreadable_bytes_as_null,
            },
            strip_unsupported_characters: opts.strip_unsupported_characters,
            quote_identifiers: opts.quote_identifiers,
            workers: opts.get_workers(),
        };
        info!(
            "Transferring {} tables in {} levels with {} workers",
            pairs.len(),
            levels.len(),
            config.workers
        );

        let engine = Arc::new(TransferEngine::new(
            source.clone(),
            target.cloned(),
            output,
            self.feedback.clone(),
            config,
            self.cancel.clone(),
        ));
        let summary = engine.run(levels).await;

        c.tables_transferred = summary.tables_transferred;
        c.tables_failed = summary.tables_failed;
        c.rows_transferred = summary.rows;
        c.aborted = summary.aborted;
    }

    fn finish(&self, started_at: DateTime<Utc>, c: RunCounters, outcome: Result<()>) -> ConversionResult {
        let (state, kind, message, exit_code) = match &outcome {
            Err(ConvertError::Canceled) => (
                ConversionState::Canceled,
                OutcomeKind::Canceled,
                "Conversion canceled".to_string(),
                ConvertError::Canceled.exit_code(),
            ),
            Err(e) => {
                error!("{}", e.format_detailed());
                self.feedback.publish(FeedbackEvent::new(Severity::Error, e.to_string()));
                (ConversionState::Failed, OutcomeKind::Error, e.to_string(), e.exit_code())
            }
            Ok(()) => {
                let (warnings, errors) = self.feedback.counts();
                if c.aborted {
                    (
                        ConversionState::Failed,
                        OutcomeKind::Error,
                        "Conversion stopped after a failed table transfer".to_string(),
                        1,
                    )
                } else if errors > 0 || c.tables_failed > 0 {
                    (
                        ConversionState::Completed,
                        OutcomeKind::Error,
                        format!(
                            "Conversion completed with {} errors ({} tables failed)",
                            errors, c.tables_failed
                        ),
                        1,
                    )
                } else if warnings > 0 {
                    (
                        ConversionState::Completed,
                        OutcomeKind::Warning,
                        format!("Conversion completed with {} warnings", warnings),
                        0,
                    )
                } else {
                    (
                        ConversionState::Completed,
                        OutcomeKind::Information,
                        "Conversion completed".to_string(),
                        0,
                    )
                }
            }
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let rows_per_second = if duration > 0.0 {
            (c.rows_transferred as f64 / duration) as u64
        } else {
            0
        };
        let (warnings, errors) = self.feedback.counts();

        let result = ConversionResult {
            run_id: self.run_id.clone(),
            outcome: kind,
            message,
            started_at,
            completed_at,
            duration_seconds: duration,
            objects_scripted: c.objects_scripted,
            objects_skipped: c.objects_skipped,
            tables_transferred: c.tables_transferred,
            tables_failed: c.tables_failed,
            rows_transferred: c.rows_transferred,
            rows_per_second,
            errors,
            warnings,
            config_hash: self.session.to_config().hash(),
            scripts: c.scripts,
            exit_code,
        };

        info!(
            "Conversion {}: {} objects scripted, {} tables, {} rows in {:.1}s ({} rows/s)",
            result.outcome.as_str(),
            result.objects_scripted,
            result.tables_transferred,
            result.rows_transferred,
            result.duration_seconds,
            result.rows_per_second
        );
        self.feedback.publish(FeedbackEvent::info(result.message.clone()));
        self.state.send_replace(state);
        self.feedback.close();
        result
    }
}

/// Tables and views present in a target snapshot.
fn existing_objects(schema: &crate::core::schema::DatabaseSchema) -> Vec<ObjectRef> {
    schema
        .tables
        .iter()
        .map(|t| ObjectRef::new(ObjectKind::Table, t.object_name()))
        .chain(
            schema
                .views
                .iter()
                .map(|v| ObjectRef::new(ObjectKind::View, v.object_name())),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;
    use crate::drivers::mssql::MssqlDialect;
    use crate::testing::{make_fk, make_test_column, make_test_table, memory_connection, MemoryDriver};

    fn memory_catalog() -> (Arc<MemoryDriver>, DriverCatalog) {
        let driver = Arc::new(MemoryDriver::default());
        let mut catalog = DriverCatalog::new();
        catalog.register(driver.clone());
        (driver, catalog)
    }

    fn session(catalog: DriverCatalog, source_engine: &str, options: ConversionOption) -> ConversionSession {
        ConversionSession::new(
            memory_connection(source_engine, "src"),
            memory_connection("memory", "dst"),
            SchemaSelection::default(),
            options,
        )
        .with_catalog(Arc::new(catalog))
    }

    fn seed_orders(driver: &MemoryDriver, rows: i64) {
        let table = make_test_table(
            "public",
            "orders",
            vec![make_test_column("id", "integer"), make_test_column("total", "numeric")],
        );
        driver.database("src").seed(
            table,
            (0..rows).map(|i| vec![SqlValue::I32(i as i32), SqlValue::I64(i * 3)]).collect(),
        );
    }

    #[tokio::test]
    async fn test_rows_are_moved_in_batches() {
        let (driver, catalog) = memory_catalog();
        seed_orders(&driver, 1200);

        let handle = Orchestrator::start(session(catalog, "memory", ConversionOption::default()));
        let result = handle.await_result().await.unwrap();

        assert!(result.is_success(), "{}", result.message);
        assert_eq!(result.rows_transferred, 1200);
        assert_eq!(result.tables_transferred, 1);
        let target = driver.database("dst");
        assert_eq!(target.write_batches("public.orders"), vec![500, 500, 200]);
        assert!(target.executed().iter().any(|s| s.starts_with("CREATE TABLE")));
        assert!(driver.database("src").is_closed());
        assert!(target.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (driver, catalog) = memory_catalog();
        seed_orders(&driver, 10);

        let handle = Orchestrator::start(session(catalog, "memory", ConversionOption::default()));
        handle.cancel();
        let state = handle.watch_state();
        let result = handle.await_result().await.unwrap();

        assert_eq!(result.outcome, OutcomeKind::Canceled);
        assert_eq!(result.rows_transferred, 0);
        assert_eq!(result.exit_code, 130);
        assert_eq!(*state.borrow(), ConversionState::Canceled);
        assert!(driver.database("dst").write_batches("public.orders").is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_transfer_rolls_back_open_transaction() {
        let (driver, catalog) = memory_catalog();
        seed_orders(&driver, 1200);
        let options = ConversionOption {
            use_transaction: true,
            ..Default::default()
        };

        let handle = Orchestrator::start(session(catalog, "memory", options));
        driver
            .database("src")
            .cancel_on_read("public.orders", 2, handle.cancel_token());
        let result = handle.await_result().await.unwrap();

        assert_eq!(result.outcome, OutcomeKind::Canceled);
        assert_eq!(result.rows_transferred, 0);
        assert_eq!(driver.database("dst").committed_rows("public.orders"), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_without_transaction_stops_table() {
        let (driver, catalog) = memory_catalog();
        seed_orders(&driver, 1200);
        driver.database("dst").fail_on_write_batch("public.orders", 2);

        let handle = Orchestrator::start(session(catalog, "memory", ConversionOption::default()));
        let result = handle.await_result().await.unwrap();

        assert_eq!(result.outcome, OutcomeKind::Error);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.rows_transferred, 500);
        let target = driver.database("dst");
        assert_eq!(target.write_batches("public.orders"), vec![500, 500]);
        assert_eq!(target.committed_rows("public.orders"), 500);
    }

    #[tokio::test]
    async fn test_failed_batch_in_transaction_leaves_table_empty() {
        let (driver, catalog) = memory_catalog();
        seed_orders(&driver, 1200);
        driver.database("dst").fail_on_write_batch("public.orders", 2);
        let options = ConversionOption {
            use_transaction: true,
            ..Default::default()
        };

        let handle = Orchestrator::start(session(catalog, "memory", options));
        let mut events = handle.subscribe();
        let result = handle.await_result().await.unwrap();

        assert_eq!(result.outcome, OutcomeKind::Error);
        assert_eq!(result.rows_transferred, 0);
        let target = driver.database("dst");
        assert_eq!(target.write_batches("public.orders").len(), 2);
        assert_eq!(target.committed_rows("public.orders"), 0);

        let mut rollback_reported = false;
        while let Some(event) = events.recv().await {
            if event.severity == Severity::Error && event.message.contains("rolled back") {
                rollback_reported = true;
            }
        }
        assert!(rollback_reported);
    }

    #[tokio::test]
    async fn test_substituted_type_is_reported_per_column() {
        let (driver, mut catalog) = memory_catalog();
        let mssql = Arc::new(MemoryDriver::new("mem_mssql", Arc::new(MssqlDialect)));
        catalog.register(mssql.clone());

        let mut hash = make_test_column("hash", "binary");
        hash.max_length = 16;
        mssql
            .database("src")
            .seed(make_test_table("dbo", "Files", vec![make_test_column("id", "int"), hash]), Vec::new());

        let handle = Orchestrator::start(session(catalog, "mem_mssql", ConversionOption::default()));
        let mut events = handle.subscribe();
        let result = handle.await_result().await.unwrap();
        assert_eq!(result.outcome, OutcomeKind::Warning);

        let mut substitution = None;
        while let Some(event) = events.recv().await {
            if event.message.contains("no exact equivalent") {
                substitution = Some(event);
            }
        }
        let event = substitution.expect("substitution warning");
        assert_eq!(event.severity, Severity::Warning);
        assert!(event.object.as_deref().is_some_and(|o| o.ends_with("hash")));
        assert!(event.message.contains("bytea"));
        assert!(driver.database("dst").executed().iter().any(|s| s.contains("bytea")));
    }

    #[tokio::test]
    async fn test_parents_load_before_children() {
        let (driver, catalog) = memory_catalog();
        let source = driver.database("src");
        let mut orders = make_test_table(
            "public",
            "orders",
            vec![make_test_column("id", "integer"), make_test_column("customer_id", "integer")],
        );
        orders
            .foreign_keys
            .push(make_fk("fk_orders_customers", "customer_id", "public", "customers"));
        source.seed(orders, vec![vec![SqlValue::I32(1), SqlValue::I32(1)]]);
        source.seed(
            make_test_table("public", "customers", vec![make_test_column("id", "integer")]),
            vec![vec![SqlValue::I32(1)]],
        );

        let handle = Orchestrator::start(session(catalog, "memory", ConversionOption::default()));
        let result = handle.await_result().await.unwrap();

        assert!(result.is_success(), "{}", result.message);
        assert_eq!(
            driver.database("dst").write_order(),
            vec!["public.customers", "public.orders"]
        );
    }

    #[tokio::test]
    async fn test_script_only_run_keeps_scripts_in_memory() {
        let (driver, catalog) = memory_catalog();
        seed_orders(&driver, 3);
        let mut options = ConversionOption {
            execute_on_target: false,
            ..Default::default()
        };
        options.output.mode = crate::config::OutputMode::InMemory;

        let handle = Orchestrator::start(session(catalog, "memory", options));
        let result = handle.await_result().await.unwrap();

        assert!(result.is_success(), "{}", result.message);
        assert_eq!(result.rows_transferred, 3);
        let script = result.scripts.join("\n");
        assert!(script.contains("CREATE TABLE"));
        assert!(script.contains("INSERT INTO"));
        assert!(driver.database("dst").executed().is_empty());
    }

    #[tokio::test]
    async fn test_aborted_transfer_still_returns_scripts() {
        let (driver, catalog) = memory_catalog();
        seed_orders(&driver, 1200);
        driver.database("dst").fail_on_write_batch("public.orders", 2);
        let mut options = ConversionOption::default();
        options.output.mode = crate::config::OutputMode::InMemory;

        let handle = Orchestrator::start(session(catalog, "memory", options));
        let result = handle.await_result().await.unwrap();

        assert_eq!(result.outcome, OutcomeKind::Error);
        assert_eq!(result.errors, 1);
        let script = result.scripts.join("\n");
        assert!(script.contains("CREATE TABLE"));
        assert!(script.contains("INSERT INTO"));
    }

    #[tokio::test]
    async fn test_canceled_transfer_still_returns_scripts() {
        let (driver, catalog) = memory_catalog();
        seed_orders(&driver, 1200);
        let mut options = ConversionOption::default();
        options.output.mode = crate::config::OutputMode::InMemory;

        let handle = Orchestrator::start(session(catalog, "memory", options));
        driver
            .database("src")
            .cancel_on_read("public.orders", 2, handle.cancel_token());
        let result = handle.await_result().await.unwrap();

        assert_eq!(result.outcome, OutcomeKind::Canceled);
        assert!(result.scripts.join("\n").contains("CREATE TABLE"));
    }

    #[tokio::test]
    async fn test_source_closed_when_target_connection_fails() {
        let (target_driver, mut catalog) = memory_catalog();
        let source_driver = Arc::new(MemoryDriver::new("mem_src", Arc::new(crate::drivers::postgres::PostgresDialect)));
        catalog.register(source_driver.clone());
        seed_orders(&source_driver, 1);
        target_driver.refuse_connections("connection refused");

        let handle = Orchestrator::start(session(catalog, "mem_src", ConversionOption::default()));
        let result = handle.await_result().await.unwrap();

        assert_eq!(result.outcome, OutcomeKind::Error);
        assert!(result.message.contains("connection refused"));
        assert!(source_driver.database("src").is_closed());
    }

    #[tokio::test]
    async fn test_permission_failure_fails_run() {
        let (driver, catalog) = memory_catalog();
        driver.database("src").deny_introspection("SELECT denied on sys.tables");

        let handle = Orchestrator::start(session(catalog, "memory", ConversionOption::default()));
        let state = handle.watch_state();
        let result = handle.await_result().await.unwrap();

        assert_eq!(result.outcome, OutcomeKind::Error);
        assert!(result.message.contains("SELECT denied"));
        assert_eq!(*state.borrow(), ConversionState::Failed);
        assert!(driver.database("src").is_closed());
    }

    #[tokio::test]
    async fn test_malformed_object_is_skipped_with_warning() {
        let (driver, catalog) = memory_catalog();
        seed_orders(&driver, 1);
        driver
            .database("src")
            .inject_malformed("public.broken_view", "definition is encrypted");

        let handle = Orchestrator::start(session(catalog, "memory", ConversionOption::default()));
        let result = handle.await_result().await.unwrap();

        assert_eq!(result.outcome, OutcomeKind::Warning);
        assert_eq!(result.objects_skipped, 1);
        assert_eq!(result.rows_transferred, 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (driver, catalog) = memory_catalog();
        let session = session(catalog, "memory", ConversionOption::default());

        let health = Orchestrator::health_check(&session).await;
        assert!(health.healthy);
        assert!(health.source.connected);

        driver.refuse_connections("connection refused");
        let health = Orchestrator::health_check(&session).await;
        assert!(!health.healthy);
        assert_eq!(health.target.error.as_deref(), Some("Connection error (memory): connection refused"));
    }
}
