//! Extraction executor
//!
//! Drives one query from session acquisition to a complete dataset, committing a checkpoint
//! after every persisted page so an interrupted run resumes where it stopped.

use crate::auth::{CredentialProvider, Session};
use crate::extractor::config::{
    BackoffPolicy, DEFAULT_CONCURRENCY, MAX_CONCURRENCY, MAX_RETRIES, RATE_LIMIT_WINDOW,
};
use crate::extractor::rate_limit::RateLimiter;
use crate::extractor::result::{ExtractionFailure, ExtractionResult, ExtractionStatus};
use crate::extractor::state::{RunState, RunStateMachine};
use crate::extractor::{ErrorKind, ExtractError, SchemaErrorPolicy};
use crate::fetcher::shared_resources::global_jira_rate_limiter;
use crate::fetcher::{Cursor, PageResult, PageSource, PaginationEngine, RateLimitedTransport};
use crate::metrics::ExtractionMetrics;
use crate::normalize::normalize_page;
use crate::output::{csv_writer_factory, DatasetWriter, OutputError, WriterFactory};
use crate::resume::{CheckpointEntry, CheckpointStore, ResumeError};
use crate::shutdown::{self, SharedShutdown};
use crate::{NormalizedRecord, QueryDescriptor};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Progress of the run in flight
struct RunProgress {
    machine: RunStateMachine,
    pages_fetched: u64,
    records_written: u64,
    records_skipped: u64,
    last_cursor: Option<Cursor>,
    current_cursor: Option<Cursor>,
    page_number: u64,
    resumed: bool,
}

impl RunProgress {
    fn new(query_hash: &str) -> Self {
        Self {
            machine: RunStateMachine::new(query_hash),
            pages_fetched: 0,
            records_written: 0,
            records_skipped: 0,
            last_cursor: None,
            current_cursor: None,
            page_number: 0,
            resumed: false,
        }
    }

    fn transition(&mut self, next: RunState) -> Result<(), ExtractError> {
        self.machine.transition(next).map_err(ExtractError::from)
    }

    fn restore(&mut self, entry: &CheckpointEntry) {
        self.pages_fetched = entry.pages_committed();
        self.records_written = entry.records_written();
        self.records_skipped = entry.records_skipped();
        self.last_cursor = entry.cursor().cloned();
        self.resumed = true;
    }
}

/// Extraction executor orchestrates the complete pull of a query
///
/// Holds everything one run needs. Every run of one executor shares its rate limiter; without
/// a configured budget the process-wide default limiter is used.
pub struct ExtractionExecutor {
    credentials: Arc<dyn CredentialProvider>,
    source: Arc<dyn PageSource>,
    limiter: Option<Arc<RateLimiter>>,
    store: CheckpointStore,
    output_dir: PathBuf,
    max_retries: u32,
    backoff: BackoffPolicy,
    force: bool,
    schema_policy: SchemaErrorPolicy,
    shutdown: Option<SharedShutdown>,
    writer_factory: WriterFactory,
}

impl ExtractionExecutor {
    /// Create an executor writing datasets to `output_dir` and checkpoints to `checkpoint_dir`
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        source: Arc<dyn PageSource>,
        output_dir: impl Into<PathBuf>,
        checkpoint_dir: impl Into<PathBuf>,
    ) -> Result<Self, ExtractError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            OutputError::IoError(format!("Failed to create {}: {}", output_dir.display(), e))
        })?;
        let store = CheckpointStore::new(checkpoint_dir)?;

        Ok(Self {
            credentials,
            source,
            limiter: None,
            store,
            output_dir,
            max_retries: MAX_RETRIES,
            backoff: BackoffPolicy::default(),
            force: false,
            schema_policy: SchemaErrorPolicy::default(),
            shutdown: shutdown::get_global_shutdown(),
            writer_factory: csv_writer_factory(),
        })
    }

    /// Set the number of transient retries per page
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Use a specific rate limiter instead of the process-wide one
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Share a limiter of `requests_per_minute` between every run of this executor
    pub fn with_requests_per_minute(self, requests_per_minute: u32) -> Self {
        self.with_rate_limiter(Arc::new(RateLimiter::per_window(
            requests_per_minute as usize,
            RATE_LIMIT_WINDOW,
        )))
    }

    /// Rate limiter every request of this executor waits on
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.limiter
            .clone()
            .unwrap_or_else(|| global_jira_rate_limiter(None))
    }

    /// Set the backoff policy for transient retries
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Restart from the first page even when a checkpoint exists
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set the handling of records that violate the schema
    pub fn with_schema_policy(mut self, policy: SchemaErrorPolicy) -> Self {
        self.schema_policy = policy;
        self
    }

    /// Replace the dataset writer factory
    pub fn with_writer_factory(mut self, factory: WriterFactory) -> Self {
        self.writer_factory = factory;
        self
    }

    /// Checkpoint store used by this executor
    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Dataset file for `query`
    pub fn destination_for(&self, query: &QueryDescriptor) -> PathBuf {
        self.output_dir.join(query.dataset_file_name())
    }

    fn transport(&self) -> RateLimitedTransport {
        RateLimitedTransport::new(self.source.clone(), self.credentials.clone(), self.rate_limiter())
            .with_max_retries(self.max_retries)
            .with_backoff(self.backoff)
            .with_shutdown(self.shutdown.clone())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    /// Extract `query` to completion, resuming from its checkpoint when one exists
    ///
    /// Never fails: errors are reported in the returned [`ExtractionResult`].
    pub async fn run_extraction(&self, query: &QueryDescriptor) -> ExtractionResult {
        let query_hash = query.query_hash();
        let span = tracing::info_span!(
            "run_extraction",
            query_hash = %query_hash.get(..12).unwrap_or(&query_hash),
            record_type = %query.record_type(),
        );
        self.run_instrumented(query, query_hash).instrument(span).await
    }

    async fn run_instrumented(&self, query: &QueryDescriptor, query_hash: String) -> ExtractionResult {
        info!(query = %query, "Starting extraction");
        let metrics = ExtractionMetrics::start(&query_hash, query.record_type().as_str());
        let destination = self.destination_for(query);
        let mut progress = RunProgress::new(&query_hash);

        let outcome = self.drive(query, &destination, &mut progress, &metrics).await;

        let (status, last_error) = match outcome {
            Ok(()) => {
                metrics.record_success(progress.records_written);
                (ExtractionStatus::Complete, None)
            }
            Err(err) if err.is_cancelled() => {
                let _ = progress.transition(RunState::Cancelled);
                info!(
                    pages_fetched = progress.pages_fetched,
                    cursor = ?progress.last_cursor,
                    "Extraction cancelled; checkpoint left resumable"
                );
                (ExtractionStatus::Cancelled, Some(self.failure(&err, &progress)))
            }
            Err(err) => {
                let from = progress.machine.current();
                let _ = progress.transition(RunState::Failed);
                let kind = err.kind();
                error!(
                    state = %from,
                    kind = %kind,
                    page = progress.page_number,
                    cursor = ?progress.current_cursor,
                    error = %err,
                    "Extraction failed"
                );
                metrics.record_failure(&kind.to_string(), &err.to_string());
                if kind != ErrorKind::InvalidQuery {
                    if let Err(e) = self.store.mark_failed(query, &err.to_string()) {
                        warn!(error = %e, "Failed to record failure in checkpoint");
                    }
                }
                (ExtractionStatus::Failed, Some(self.failure(&err, &progress)))
            }
        };

        ExtractionResult {
            query_hash,
            query: query.to_string(),
            status,
            records_written: progress.records_written,
            records_skipped: progress.records_skipped,
            pages_fetched: progress.pages_fetched,
            last_cursor: progress.last_cursor.clone(),
            last_error,
            resumed: progress.resumed,
            destination,
            state_history: progress.machine.history().to_vec(),
        }
    }

    fn failure(&self, err: &ExtractError, progress: &RunProgress) -> ExtractionFailure {
        ExtractionFailure {
            kind: err.kind(),
            message: err.to_string(),
            cursor: progress.current_cursor.clone(),
            page_number: progress.page_number,
        }
    }

    async fn drive(
        &self,
        query: &QueryDescriptor,
        destination: &Path,
        progress: &mut RunProgress,
        metrics: &ExtractionMetrics,
    ) -> Result<(), ExtractError> {
        query.validate()?;

        progress.transition(RunState::Authenticating)?;
        let mut session = self.credentials.acquire().await?;
        debug!(account = ?session.account(), "Session acquired");

        progress.transition(RunState::Resuming)?;
        let query_hash = query.query_hash();
        let mut engine = match self.store.load(&query_hash)? {
            Some(_) if self.force => {
                info!("Force set; ignoring stored checkpoint and restarting from the first page");
                PaginationEngine::new(query)
            }
            Some(entry) if entry.is_complete() => {
                progress.restore(&entry);
                info!(
                    records_written = entry.records_written(),
                    "Checkpoint already complete; nothing to extract"
                );
                return self.finish(progress);
            }
            Some(entry) if entry.is_exhausted() => {
                progress.restore(&entry);
                info!("Every page was committed before the last run stopped; marking complete");
                self.store.mark_complete(query)?;
                return self.finish(progress);
            }
            Some(entry) => {
                progress.restore(&entry);
                info!(
                    cursor = ?entry.cursor(),
                    pages_committed = entry.pages_committed(),
                    records_written = entry.records_written(),
                    status = %entry.status(),
                    "Resuming from checkpoint"
                );
                PaginationEngine::resume_from(query, entry.cursor().cloned(), entry.pages_committed())
            }
            None => {
                debug!("No checkpoint found, starting from the first page");
                PaginationEngine::new(query)
            }
        };

        let mut writer = (self.writer_factory)(destination)?;
        let transport = self.transport();

        loop {
            if self.shutdown_requested() {
                return Err(ExtractError::Cancelled);
            }
            let request = match engine.next_request()? {
                Some(request) => request,
                None => break,
            };
            progress.page_number = request.page_number();
            progress.current_cursor = request.cursor().cloned();

            self.refresh_session(&mut session).await?;

            progress.transition(RunState::Fetching)?;
            let page = transport.send(&mut session, &request).await?;
            engine.advance(&page)?;

            progress.transition(RunState::Normalizing)?;
            let (records, skipped) = self.normalize(query, &page)?;

            progress.transition(RunState::Persisting)?;
            let (returned, written) = persist_records(writer, records).await?;
            writer = returned;

            progress.transition(RunState::Checkpointing)?;
            let entry = CheckpointEntry::new(
                engine.cursor().cloned(),
                engine.pages_fetched(),
                progress.records_written + written,
            )
            .with_skipped(progress.records_skipped + skipped);
            self.commit_checkpoint(query, entry).await?;

            progress.records_written += written;
            progress.records_skipped += skipped;
            progress.pages_fetched = engine.pages_fetched();
            progress.last_cursor = engine.cursor().cloned();
            metrics.record_page(written, skipped);

            info!(
                page = request.page_number(),
                fetched = page.len(),
                written = written,
                skipped = skipped,
                total_written = progress.records_written,
                next = ?engine.cursor(),
                "Page committed"
            );

            if engine.is_finished() {
                break;
            }
        }

        self.store.mark_complete(query)?;
        info!(
            pages_fetched = progress.pages_fetched,
            records_written = progress.records_written,
            records_skipped = progress.records_skipped,
            destination = %writer.destination().display(),
            "Result set exhausted"
        );
        self.finish(progress)
    }

    /// Commit on the blocking pool; the store waits on file locks and fsyncs
    async fn commit_checkpoint(&self, query: &QueryDescriptor, entry: CheckpointEntry) -> Result<(), ExtractError> {
        let store = self.store.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || store.commit(&query, entry))
            .await
            .map_err(|e| ResumeError::IoError(format!("checkpoint task failed: {}", e)))??;
        Ok(())
    }

    fn finish(&self, progress: &mut RunProgress) -> Result<(), ExtractError> {
        progress.transition(RunState::Completed)?;
        progress.transition(RunState::Done)
    }

    async fn refresh_session(&self, session: &mut Session) -> Result<(), ExtractError> {
        if self.credentials.is_expired(session) {
            info!(expires_at = %session.expires_at(), "Session near expiry, re-acquiring");
            *session = self.credentials.acquire().await?;
        }
        Ok(())
    }

    fn normalize(&self, query: &QueryDescriptor, page: &PageResult) -> Result<(Vec<NormalizedRecord>, u64), ExtractError> {
        let mut records = Vec::with_capacity(page.len());
        let mut skipped = 0;
        for raw in page.records() {
            match normalize_page(raw, query) {
                Ok(mut batch) => records.append(&mut batch),
                Err(e) => match self.schema_policy {
                    SchemaErrorPolicy::Fail => return Err(e.into()),
                    SchemaErrorPolicy::Skip => {
                        warn!(error = %e, "Skipping record that violates the schema");
                        skipped += 1;
                    }
                },
            }
        }
        Ok((records, skipped))
    }

    /// Extract several independent queries with at most `concurrency` in flight
    ///
    /// Results are returned in input order. Runs share only the rate limiter.
    pub async fn run_many(&self, queries: &[QueryDescriptor], concurrency: usize) -> Vec<ExtractionResult> {
        let concurrency = if concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            concurrency.min(MAX_CONCURRENCY)
        };
        info!(queries = queries.len(), concurrency, "Starting batch extraction");

        futures_util::stream::iter(queries.iter().map(|query| self.run_extraction(query)))
            .buffered(concurrency)
            .collect()
            .await
    }
}

/// Upsert `records` on the blocking pool, handing the writer back for the next page
///
/// A CSV write rewrites the whole dataset under an exclusive lock.
async fn persist_records(
    mut writer: Box<dyn DatasetWriter>,
    records: Vec<NormalizedRecord>,
) -> Result<(Box<dyn DatasetWriter>, u64), ExtractError> {
    let (writer, written) = tokio::task::spawn_blocking(move || {
        let written = writer.write(&records);
        (writer, written)
    })
    .await
    .map_err(|e| OutputError::IoError(format!("writer task failed: {}", e)))?;
    Ok((writer, written?))
}
