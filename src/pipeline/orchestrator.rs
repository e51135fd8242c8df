//! Pipeline orchestrator: sequences the stages under the run lock.
//!
//! `run()` executes ingestion → cleaning → reporting, stopping at the first
//! stage that fails. Each stage is also callable on its own, and so are the
//! administrative operations. Every entry point holds the run lock for its
//! whole duration.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::channels::delivery::Delivery;
use crate::channels::source::MessageSource;
use crate::config::PipelineConfig;
use crate::error::{ConfigError, PipelineError};
use crate::extract::ScratchDocuments;
use crate::lock::RunLock;
use crate::pipeline::clean::Cleaner;
use crate::pipeline::export::Exporter;
use crate::pipeline::ingest::Ingestor;
use crate::pipeline::types::{CheckReport, CleanReport, ExportReport, IngestReport, RunReport};
use crate::store::{DedupReport, TableStore, remove_duplicates};

const INGESTION: &str = "ingestion";
const CLEANING: &str = "cleaning";
const REPORTING: &str = "reporting";

/// The assembled pipeline with its injected collaborators.
pub struct Pipeline {
    store: Arc<dyn TableStore>,
    source: Option<Arc<dyn MessageSource>>,
    delivery: Option<Arc<dyn Delivery>>,
    extractor: Option<Arc<dyn ScratchDocuments>>,
    config: Arc<PipelineConfig>,
}

impl Pipeline {
    /// A pipeline over `store`. Source, delivery, and extractor are optional;
    /// stages that need a missing one fail with a configuration error.
    pub fn new(store: Arc<dyn TableStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            source: None,
            delivery: None,
            extractor: None,
            config: Arc::new(config),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn MessageSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ScratchDocuments>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn lock(&self) -> Result<RunLock, PipelineError> {
        RunLock::acquire(&self.config.lock.path, self.config.lock.stale_after)
    }

    fn ingestor(&self) -> Result<Ingestor, PipelineError> {
        let source = self
            .source
            .clone()
            .ok_or(ConfigError::MissingCollaborator("message source"))?;
        Ok(Ingestor::new(
            Arc::clone(&self.store),
            source,
            self.extractor.clone(),
            Arc::clone(&self.config),
        ))
    }

    fn cleaner(&self) -> Cleaner {
        Cleaner::new(Arc::clone(&self.store), Arc::clone(&self.config))
    }

    fn exporter(&self) -> Result<Exporter, PipelineError> {
        let delivery = self
            .delivery
            .clone()
            .ok_or(ConfigError::MissingCollaborator("delivery channel"))?;
        Ok(Exporter::new(
            Arc::clone(&self.store),
            delivery,
            Arc::clone(&self.config),
        ))
    }

    // ── Full run ────────────────────────────────────────────────────

    /// Ingest, clean, and report, in that order.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        self.run_at(Utc::now()).await
    }

    /// Full run with every timestamp taken from `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport, PipelineError> {
        let _lock = self.lock()?;
        info!("Starting pipeline run");

        let ingest = stage(INGESTION, async { self.ingestor()?.ingest_at(now).await }).await?;
        let clean = stage(CLEANING, self.cleaner().clean_at(now)).await?;
        let export = stage(REPORTING, async {
            self.exporter()?.generate_and_send_reports_at(now).await
        })
        .await?;

        info!(
            rows_ingested = ingest.rows_appended,
            rows_cleaned = clean.rows_added,
            groups_sent = export.delivered(),
            groups_failed = export.failed(),
            "Pipeline run complete"
        );
        Ok(RunReport {
            ingest,
            clean,
            export,
        })
    }

    // ── Single stages ───────────────────────────────────────────────

    pub async fn ingest(&self) -> Result<IngestReport, PipelineError> {
        let _lock = self.lock()?;
        stage(INGESTION, async { self.ingestor()?.ingest().await }).await
    }

    pub async fn clean(&self) -> Result<CleanReport, PipelineError> {
        let _lock = self.lock()?;
        stage(CLEANING, self.cleaner().clean()).await
    }

    pub async fn report(&self) -> Result<ExportReport, PipelineError> {
        let _lock = self.lock()?;
        stage(REPORTING, async {
            self.exporter()?.generate_and_send_reports().await
        })
        .await
    }

    // ── Administration ──────────────────────────────────────────────

    /// Rewrite `table` without duplicate rows, comparing columns after
    /// `prefix_width`.
    pub async fn dedup(&self, table: &str, prefix_width: usize) -> Result<DedupReport, PipelineError> {
        let _lock = self.lock()?;
        info!(table = %table, prefix_width, "Starting duplicate removal");
        Ok(remove_duplicates(self.store.as_ref(), table, prefix_width).await?)
    }

    /// Remove the fetched marker from up to `max` source messages.
    pub async fn cleanup_labels(&self, max: usize) -> Result<usize, PipelineError> {
        let _lock = self.lock()?;
        let source = self
            .source
            .as_ref()
            .ok_or(ConfigError::MissingCollaborator("message source"))?;
        let label = &self.config.fetch.processed_label;
        let cleared = source.clear_fetched_marks(label, max).await?;
        info!(label = %label, cleared, "Cleared fetched markers");
        Ok(cleared)
    }

    /// Verify every configured table is readable and the source answers.
    ///
    /// Problems are collected, not returned as errors.
    pub async fn check_configuration(&self) -> CheckReport {
        let mut report = CheckReport::default();

        for name in self.config.tables.all() {
            match self.store.read_table(name).await {
                Ok(table) => info!(
                    table = %name,
                    columns = table.header.len(),
                    rows = table.rows.len(),
                    "Table readable"
                ),
                Err(e) => {
                    warn!(table = %name, error = %e, "Table check failed");
                    report.table_problems.push((name.to_string(), e.to_string()));
                }
            }
        }

        if let Some(source) = &self.source {
            if let Err(e) = source.health_check().await {
                warn!(source = source.name(), error = %e, "Source check failed");
                report.source_problem = Some(e.to_string());
            }
        }

        if self.delivery.is_none() {
            warn!("No delivery channel configured; reporting will fail");
        }
        if self.config.report.recipient.trim().is_empty() {
            warn!("No export recipient configured; reporting will fail");
        }

        report
    }
}

/// Run one stage between start/end banners, wrapping any failure.
async fn stage<T, F>(name: &'static str, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    info!("Starting {name}");
    match fut.await {
        Ok(value) => {
            info!("{name} complete");
            Ok(value)
        }
        Err(e) => {
            error!(stage = name, error = %e, "Stage failed");
            Err(PipelineError::Stage {
                stage: name,
                source: Box::new(e),
            })
        }
    }
}
