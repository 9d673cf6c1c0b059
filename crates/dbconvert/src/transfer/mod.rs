//! Batched data transfer between two interpreters.
//!
//! Each table is moved by one [`TransferJob`] on its own pair of sessions:
//! read a batch from the source, translate its values, write it to the
//! target (and/or render it as an INSERT script), then read the next one.
//! At most one batch per table is in flight, so rows arrive in source order.
//!
//! Tables are scheduled by dependency level: every table of a level starts
//! only after all tables of earlier levels are done, and tables within a
//! level run concurrently up to the worker count.

mod translate;

pub use translate::ValueTranslator;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::core::schema::{ObjectKind, Table};
use crate::core::traits::{DatabaseInterpreter, ReadOptions, Session};
use crate::error::{ConvertError, Result};
use crate::feedback::{FeedbackEvent, FeedbackHub, Severity};
use crate::script::render::insert_statement;
use crate::script::{ScriptOutput, ScriptUnit};

/// One table to move.
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Source table, restricted to the columns that are loaded.
    pub source: Table,
    /// Target table, column for column with `source`.
    pub target: Table,
    /// Dependency rank, used for data script units.
    pub rank: usize,
}

impl TransferJob {
    /// Build a job from a source table and its mapped counterpart.
    ///
    /// Columns that are computed on the target cannot be inserted and are
    /// left out on both sides.
    pub fn new(source: &Table, target: &Table, rank: usize) -> Self {
        let keep: Vec<bool> = target.columns.iter().map(|c| !c.is_computed()).collect();
        let mut source = source.clone();
        let mut target = target.clone();
        let mut i = 0;
        source.columns.retain(|_| {
            i += 1;
            keep.get(i - 1).copied().unwrap_or(true)
        });
        target.columns.retain(|c| !c.is_computed());
        Self { source, target, rank }
    }

    pub fn name(&self) -> String {
        self.source.full_name()
    }
}

/// Statistics for one table.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    pub rows: u64,
    pub batches: u64,
    pub failed_batches: u64,
    pub duration: Duration,
    pub completed: bool,
    /// Stopped by cancellation or by another table's failure.
    pub interrupted: bool,
}

/// Transfer settings taken from the conversion options.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub batch_size: usize,
    pub use_transaction: bool,
    pub continue_on_error: bool,
    pub read_options: ReadOptions,
    pub strip_unsupported_characters: bool,
    pub quote_identifiers: bool,
    pub workers: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            use_transaction: false,
            continue_on_error: false,
            read_options: ReadOptions::default(),
            strip_unsupported_characters: false,
            quote_identifiers: true,
            workers: 4,
        }
    }
}

/// Outcome of the whole data phase.
#[derive(Debug, Clone, Default)]
pub struct TransferSummary {
    pub tables_transferred: usize,
    pub tables_failed: usize,
    pub rows: u64,
    /// An abort-level failure stopped the run.
    pub aborted: bool,
    pub canceled: bool,
}

/// Moves table data from a source interpreter to a target.
pub struct TransferEngine {
    source: Arc<dyn DatabaseInterpreter>,
    /// `None` when data is only rendered as scripts.
    target: Option<Arc<dyn DatabaseInterpreter>>,
    output: Arc<ScriptOutput>,
    feedback: Arc<FeedbackHub>,
    config: TransferConfig,
    cancel: CancellationToken,
    /// Child of `cancel`; also fired by an abort-level failure.
    abort: CancellationToken,
    rows_transferred: AtomicU64,
}

impl TransferEngine {
    pub fn new(
        source: Arc<dyn DatabaseInterpreter>,
        target: Option<Arc<dyn DatabaseInterpreter>>,
        output: Arc<ScriptOutput>,
        feedback: Arc<FeedbackHub>,
        config: TransferConfig,
        cancel: CancellationToken,
    ) -> Self {
        let abort = cancel.child_token();
        Self {
            source,
            target,
            output,
            feedback,
            config,
            cancel,
            abort,
            rows_transferred: AtomicU64::new(0),
        }
    }

    /// Rows committed (or rendered) so far.
    pub fn rows_transferred(&self) -> u64 {
        self.rows_transferred.load(Ordering::Relaxed)
    }

    /// Transfer all levels in order.
    pub async fn run(self: Arc<Self>, levels: Vec<Vec<TransferJob>>) -> TransferSummary {
        let mut summary = TransferSummary::default();
        let workers = self.config.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        for (depth, level) in levels.into_iter().enumerate() {
            if self.abort.is_cancelled() {
                break;
            }
            debug!("Transfer level {}: {} tables", depth, level.len());

            let mut handles = Vec::with_capacity(level.len());
            for job in level {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                if self.abort.is_cancelled() {
                    break;
                }
                let engine = self.clone();
                let name = job.name();
                let handle = tokio::spawn(async move {
                    let result = engine.execute(job).await;
                    drop(permit);
                    result
                });
                handles.push((name, handle));
            }

            for (name, handle) in handles {
                match handle.await {
                    Ok(Ok(stats)) if stats.completed => summary.tables_transferred += 1,
                    Ok(Ok(_)) => {}
                    Ok(Err(_)) => summary.tables_failed += 1,
                    Err(e) => {
                        self.feedback.report(&ConvertError::read(
                            name,
                            format!("Transfer task failed: {}", e),
                        ));
                        summary.tables_failed += 1;
                        self.fail_fast();
                    }
                }
            }
        }

        summary.rows = self.rows_transferred();
        summary.canceled = self.cancel.is_cancelled();
        summary.aborted = self.abort.is_cancelled() && !summary.canceled;
        summary
    }

    fn fail_fast(&self) {
        if !self.config.continue_on_error {
            self.abort.cancel();
        }
    }

    /// Transfer one table. Errors are reported to the feedback hub before
    /// they are returned.
    pub async fn execute(&self, job: TransferJob) -> Result<TransferStats> {
        let span = tracing::info_span!("transfer", table = %job.name());
        async {
            let result = self.execute_inner(&job).await;
            if let Err(e) = &result {
                let mut event = FeedbackEvent::from_error(e).with_object(job.name());
                if !self.config.continue_on_error {
                    // The failure ends the run.
                    event = event.with_severity(Severity::Error);
                }
                self.feedback.publish(event);
                self.fail_fast();
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute_inner(&self, job: &TransferJob) -> Result<TransferStats> {
        let name = job.name();
        let start = Instant::now();
        let mut stats = TransferStats::default();
        let batch_size = self.config.batch_size.max(1);

        let mut source = self.source.session().await?;
        let mut target = match &self.target {
            Some(t) => Some(t.session().await?),
            None => None,
        };
        let translator = ValueTranslator::new(
            self.output_dialect(target.as_deref()),
            &job.target.columns,
            self.config.strip_unsupported_characters,
        );
        let in_tx = self.config.use_transaction && target.is_some();

        if let Some(session) = target.as_deref_mut() {
            if in_tx {
                session.begin().await?;
            }
            let dialect = session.dialect();
            for sql in dialect.pre_load_statements(&job.target, self.config.quote_identifiers) {
                if let Err(e) = session.execute(&sql).await {
                    return Err(self.abandon(session, &name, in_tx, e).await);
                }
            }
        }

        info!("{}: starting transfer (batch size {})", name, batch_size);
        let mut offset = 0u64;
        let mut pending = 0u64;

        loop {
            if self.abort.is_cancelled() {
                stats.interrupted = true;
                if let Some(session) = target.as_deref_mut() {
                    if in_tx {
                        session.rollback().await?;
                        pending = 0;
                        self.feedback.warning(format!(
                            "{}: transfer interrupted; the table's transaction was rolled back",
                            name
                        ));
                    }
                }
                break;
            }

            let rows = match source
                .read_rows(&job.source, offset, batch_size, self.config.read_options)
                .await
            {
                Ok(rows) => rows,
                Err(e) => match target.as_deref_mut() {
                    Some(session) => return Err(self.abandon(session, &name, in_tx, e).await),
                    None => return Err(e),
                },
            };
            if rows.is_empty() {
                break;
            }
            let count = rows.len();
            let rows: Vec<_> = rows.into_iter().map(|r| translator.translate_row(r)).collect();
            stats.batches += 1;

            if self.output.is_enabled() {
                let dialect = self.output_dialect(target.as_deref());
                let unit = ScriptUnit::new(
                    name.clone(),
                    ObjectKind::Data,
                    job.rank,
                    vec![insert_statement(
                        dialect.as_ref(),
                        &job.target,
                        &rows,
                        self.config.quote_identifiers,
                    )],
                );
                self.output.emit(&unit)?;
            }

            match target.as_deref_mut() {
                None => {
                    stats.rows += count as u64;
                    self.rows_transferred.fetch_add(count as u64, Ordering::Relaxed);
                }
                Some(session) => match session.write_rows(&job.target, &rows).await {
                    Ok(written) => {
                        stats.rows += written;
                        if in_tx {
                            pending += written;
                        } else {
                            self.rows_transferred.fetch_add(written, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        let e = e.at_offset(offset);
                        if in_tx || !self.config.continue_on_error {
                            return Err(self.abandon(session, &name, in_tx, e).await);
                        }
                        // Rows before the offending one were written.
                        if let ConvertError::Write { row_index, .. } = &e {
                            let partial = *row_index as u64;
                            stats.rows += partial;
                            self.rows_transferred.fetch_add(partial, Ordering::Relaxed);
                        }
                        stats.failed_batches += 1;
                        self.feedback
                            .publish(FeedbackEvent::from_error(&e).with_object(name.clone()));
                    }
                },
            }

            offset += count as u64;
            if count < batch_size {
                break;
            }
        }

        if let Some(session) = target.as_deref_mut() {
            if !stats.interrupted {
                let dialect = session.dialect();
                for sql in dialect.post_load_statements(&job.target, self.config.quote_identifiers) {
                    if let Err(e) = session.execute(&sql).await {
                        return Err(self.abandon(session, &name, in_tx, e).await);
                    }
                }
                if in_tx {
                    if let Err(e) = session.commit().await {
                        return Err(self.abandon(session, &name, in_tx, e).await);
                    }
                    self.rows_transferred.fetch_add(pending, Ordering::Relaxed);
                }
            }
        }

        stats.duration = start.elapsed();
        stats.completed = !stats.interrupted;
        if stats.interrupted {
            warn!("{}: transfer interrupted after {} rows", name, stats.rows);
        } else {
            let secs = stats.duration.as_secs_f64();
            let rate = if secs > 0.0 { (stats.rows as f64 / secs) as u64 } else { 0 };
            info!(
                "{}: transferred {} rows in {} batches ({:?}, {} rows/sec)",
                name, stats.rows, stats.batches, stats.duration, rate
            );
            self.feedback.publish(
                FeedbackEvent::info(format!("{}: {} rows transferred", name, stats.rows))
                    .with_object(name.clone()),
            );
        }
        Ok(stats)
    }

    /// Roll back an open transaction after a failure. Returns the error to
    /// report: a `TransactionRollback` when a transaction was open.
    async fn abandon(&self, session: &mut dyn Session, table: &str, in_tx: bool, cause: ConvertError) -> ConvertError {
        if !in_tx {
            return cause;
        }
        if let Err(e) = session.rollback().await {
            warn!("{}: rollback failed: {}", table, e);
        }
        ConvertError::TransactionRollback {
            table: table.to_string(),
            message: cause.to_string(),
        }
    }

    fn output_dialect(&self, target: Option<&dyn Session>) -> Arc<dyn crate::core::traits::Dialect> {
        match target {
            Some(session) => session.dialect(),
            None => self
                .target
                .as_ref()
                .map(|t| t.dialect())
                .unwrap_or_else(|| self.source.dialect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;
    use crate::testing::{make_test_column, make_test_table, MemoryInterpreter};

    fn orders_job() -> TransferJob {
        let table = make_test_table(
            "dbo",
            "Orders",
            vec![make_test_column("id", "int"), make_test_column("total", "decimal")],
        );
        TransferJob::new(&table, &table, 0)
    }

    fn engine(
        source: Arc<MemoryInterpreter>,
        target: Option<Arc<MemoryInterpreter>>,
        config: TransferConfig,
    ) -> Arc<TransferEngine> {
        Arc::new(TransferEngine::new(
            source,
            target.map(|t| t as Arc<dyn DatabaseInterpreter>),
            Arc::new(ScriptOutput::none()),
            Arc::new(FeedbackHub::default()),
            config,
            CancellationToken::new(),
        ))
    }

    fn seeded(rows: i64) -> Arc<MemoryInterpreter> {
        let source = MemoryInterpreter::new();
        source.seed(
            orders_job().source,
            (0..rows).map(|i| vec![SqlValue::I64(i), SqlValue::I64(i * 10)]).collect(),
        );
        Arc::new(source)
    }

    #[tokio::test]
    async fn test_batches_follow_batch_size() {
        let source = seeded(1200);
        let target = Arc::new(MemoryInterpreter::new());
        let engine = engine(source, Some(target.clone()), TransferConfig::default());

        let stats = engine.execute(orders_job()).await.unwrap();
        assert_eq!(stats.rows, 1200);
        assert_eq!(stats.batches, 3);
        assert_eq!(target.write_batches("dbo.Orders"), vec![500, 500, 200]);
        assert_eq!(engine.rows_transferred(), 1200);
    }

    #[tokio::test]
    async fn test_failure_without_transaction_keeps_earlier_batches() {
        let source = seeded(1200);
        let target = Arc::new(MemoryInterpreter::new());
        target.fail_on_write_batch("dbo.Orders", 2);
        let engine = engine(source, Some(target.clone()), TransferConfig::default());

        let err = engine.execute(orders_job()).await.unwrap_err();
        assert!(matches!(err, ConvertError::Write { batch_offset: 500, .. }));
        assert_eq!(target.committed_rows("dbo.Orders"), 500);
        assert_eq!(target.write_batches("dbo.Orders").len(), 2);
    }

    #[tokio::test]
    async fn test_aborting_write_failure_is_reported_as_error() {
        let source = seeded(1200);
        let target = Arc::new(MemoryInterpreter::new());
        target.fail_on_write_batch("dbo.Orders", 2);
        let hub = Arc::new(FeedbackHub::default());
        let engine = Arc::new(TransferEngine::new(
            source,
            Some(target as Arc<dyn DatabaseInterpreter>),
            Arc::new(ScriptOutput::none()),
            hub.clone(),
            TransferConfig::default(),
            CancellationToken::new(),
        ));

        let summary = engine.clone().run(vec![vec![orders_job()]]).await;
        assert!(summary.aborted);
        assert_eq!(summary.tables_failed, 1);

        let failure = hub
            .events()
            .into_iter()
            .find(|e| e.object.as_deref() == Some("dbo.Orders") && e.severity != Severity::Info)
            .unwrap();
        assert_eq!(failure.severity, Severity::Error);
        assert!(!failure.ignorable);
        assert_eq!(hub.counts(), (0, 1));
    }

    #[tokio::test]
    async fn test_skipped_batch_is_reported_as_warning() {
        let source = seeded(1200);
        let target = Arc::new(MemoryInterpreter::new());
        target.fail_on_write_batch("dbo.Orders", 2);
        let hub = Arc::new(FeedbackHub::default());
        let config = TransferConfig {
            continue_on_error: true,
            ..Default::default()
        };
        let engine = TransferEngine::new(
            source,
            Some(target as Arc<dyn DatabaseInterpreter>),
            Arc::new(ScriptOutput::none()),
            hub.clone(),
            config,
            CancellationToken::new(),
        );

        engine.execute(orders_job()).await.unwrap();
        assert_eq!(hub.counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_failure_in_transaction_rolls_back_table() {
        let source = seeded(1200);
        let target = Arc::new(MemoryInterpreter::new());
        target.fail_on_write_batch("dbo.Orders", 2);
        let config = TransferConfig {
            use_transaction: true,
            ..Default::default()
        };
        let engine = engine(source, Some(target.clone()), config);

        let err = engine.execute(orders_job()).await.unwrap_err();
        assert!(matches!(err, ConvertError::TransactionRollback { .. }));
        assert_eq!(target.committed_rows("dbo.Orders"), 0);
        assert_eq!(target.write_batches("dbo.Orders").len(), 2);
        assert_eq!(engine.rows_transferred(), 0);
    }

    #[tokio::test]
    async fn test_continue_on_error_skips_failed_batch() {
        let source = seeded(1200);
        let target = Arc::new(MemoryInterpreter::new());
        target.fail_on_write_batch("dbo.Orders", 2);
        let config = TransferConfig {
            continue_on_error: true,
            ..Default::default()
        };
        let engine = engine(source, Some(target.clone()), config);

        let stats = engine.execute(orders_job()).await.unwrap();
        assert!(stats.completed);
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(target.committed_rows("dbo.Orders"), 700);
        assert_eq!(target.write_batches("dbo.Orders").len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_values_fail_the_read() {
        let source = seeded(3);
        source.unreadable_column("dbo.Orders", "total");
        let target = Arc::new(MemoryInterpreter::new());
        let engine = engine(source, Some(target.clone()), TransferConfig::default());

        let err = engine.execute(orders_job()).await.unwrap_err();
        assert!(matches!(err, ConvertError::Read { .. }));
        assert!(err.to_string().contains("total"));
        assert_eq!(target.committed_rows("dbo.Orders"), 0);
    }

    #[tokio::test]
    async fn test_unreadable_values_read_as_null_when_allowed() {
        let source = seeded(3);
        source.unreadable_column("dbo.Orders", "total");
        let target = Arc::new(MemoryInterpreter::new());
        let config = TransferConfig {
            read_options: ReadOptions {
                treat_unreadable_bytes_as_null: true,
            },
            ..Default::default()
        };
        let engine = engine(source, Some(target.clone()), config);

        let stats = engine.execute(orders_job()).await.unwrap();
        assert_eq!(stats.rows, 3);
        let rows = target.rows("dbo.Orders");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][0], SqlValue::I64(2));
        assert!(rows.iter().all(|r| r[1].is_null()));
    }

    #[tokio::test]
    async fn test_computed_target_columns_not_loaded() {
        let source = make_test_table(
            "dbo",
            "Lines",
            vec![make_test_column("qty", "int"), make_test_column("total", "int")],
        );
        let mut target = source.clone();
        target.columns[1].computed_expression = Some("qty * 2".into());
        let job = TransferJob::new(&source, &target, 0);
        assert_eq!(job.source.columns.len(), 1);
        assert_eq!(job.target.columns.len(), 1);
        assert_eq!(job.target.columns[0].name, "qty");
    }

    #[tokio::test]
    async fn test_levels_respect_dependencies() {
        let parent = make_test_table("dbo", "Parent", vec![make_test_column("id", "int")]);
        let child = make_test_table("dbo", "Child", vec![make_test_column("id", "int")]);
        let source = MemoryInterpreter::new();
        source.seed(parent.clone(), vec![vec![SqlValue::I32(1)]; 3]);
        source.seed(child.clone(), vec![vec![SqlValue::I32(1)]; 2]);
        let target = Arc::new(MemoryInterpreter::new());
        let engine = engine(Arc::new(source), Some(target.clone()), TransferConfig::default());

        let summary = engine
            .run(vec![
                vec![TransferJob::new(&parent, &parent, 0)],
                vec![TransferJob::new(&child, &child, 1)],
            ])
            .await;
        assert_eq!(summary.tables_transferred, 2);
        assert_eq!(summary.rows, 5);
        assert_eq!(target.write_order(), vec!["dbo.Parent", "dbo.Child"]);
    }
}
