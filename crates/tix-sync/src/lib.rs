//! Sync pipeline orchestration: ingest ticket snapshots, rebuild the daily
//! and impact views, and keep a bounded outcome log.

pub mod config;
pub mod lease;
pub mod ledger;
pub mod outcome;
pub mod report;
pub mod views;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tix_adapters::{AdExportAdapter, ArtifactAdapter};
use tix_core::{DailyTotal, SyncOutcome, Table};
use tix_storage::{ArtifactSource, CsvTableStore, LocalArtifactSource, TableSink};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{AdColumns, PipelineConfig, SalesColumns, SyncConfig, TableNames};
pub use lease::RunLease;
pub use outcome::{report_outcomes_markdown, OutcomeLog};

pub const CRATE_NAME: &str = "tix-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("another sync run holds {lock_path} ({holder})")]
    RunInProgress { lock_path: String, holder: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ingested_artifacts: Vec<String>,
    pub appended_rows: usize,
    /// `None` when the daily view was left as it was.
    pub daily_days: Option<usize>,
    pub ad_rows: usize,
    /// `None` when the impact view was left as it was.
    pub impact_days: Option<usize>,
    pub parquet_manifest: Option<String>,
}

impl SyncRunSummary {
    pub fn message(&self) -> String {
        let daily = self
            .daily_days
            .map(|n| format!("{n} day(s)"))
            .unwrap_or_else(|| "unchanged".to_string());
        let impact = self
            .impact_days
            .map(|n| format!("{n} day(s)"))
            .unwrap_or_else(|| "unchanged".to_string());
        format!(
            "ingested {} file(s), {} row(s); daily totals {}; ad rows {}; impact {}",
            self.ingested_artifacts.len(),
            self.appended_rows,
            daily,
            self.ad_rows,
            impact
        )
    }
}

pub struct SyncPipeline {
    config: SyncConfig,
    pipeline: PipelineConfig,
    source: Arc<dyn ArtifactSource>,
    sink: Arc<dyn TableSink>,
}

impl SyncPipeline {
    /// Pipeline over the local artifact directory and CSV table directory
    /// named in `config`.
    pub fn new(config: SyncConfig, pipeline: PipelineConfig) -> Self {
        let source = Arc::new(LocalArtifactSource::new(config.artifacts_dir.clone()));
        let sink = Arc::new(CsvTableStore::new(config.tables_dir.clone()));
        Self {
            config,
            pipeline,
            source,
            sink,
        }
    }

    pub fn with_backends(
        mut self,
        source: Arc<dyn ArtifactSource>,
        sink: Arc<dyn TableSink>,
    ) -> Self {
        self.source = source;
        self.sink = sink;
        self
    }

    pub fn outcome_log(&self) -> OutcomeLog<'_> {
        OutcomeLog::new(
            self.sink.as_ref(),
            &self.pipeline.tables.sync_log,
            self.pipeline.outcome_history_cap,
        )
    }

    /// One full sync cycle under the run lease. Every cycle that gets the
    /// lease leaves exactly one outcome in the log; a failure is recorded
    /// and then returned.
    pub async fn run_once(&self) -> Result<SyncRunSummary, SyncError> {
        let lease = RunLease::acquire(
            &self.config.lock_path(),
            Duration::from_secs(self.config.stale_lease_secs),
        )?;
        let span = info_span!("sync_run", run_id = %lease.token());
        self.run_under_lease(lease).instrument(span).await
    }

    async fn run_under_lease(&self, lease: RunLease) -> Result<SyncRunSummary, SyncError> {
        let started_at = Utc::now();
        let result = self.run_stages(lease.token(), started_at).await;
        let log = self.outcome_log();

        match result {
            Ok(summary) => {
                log.record(&SyncOutcome::success(summary.message()))
                    .await
                    .context("recording sync outcome")?;
                lease.release()?;
                info!(
                    files = summary.ingested_artifacts.len(),
                    rows = summary.appended_rows,
                    "sync complete"
                );
                Ok(summary)
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(error = %message, "sync failed");
                if let Err(log_err) = log.record(&SyncOutcome::error(message)).await {
                    warn!(error = %format!("{log_err:#}"), "could not record failed sync outcome");
                }
                drop(lease);
                Err(SyncError::Other(err))
            }
        }
    }

    async fn run_stages(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<SyncRunSummary> {
        let tables = &self.pipeline.tables;

        let ledger = self
            .sink
            .read(&tables.raw_ledger)
            .await
            .with_context(|| format!("reading {}", tables.raw_ledger))?;
        let append = ledger::collect_new_snapshots(
            self.source.as_ref(),
            &self.pipeline.ticket_prefix,
            &ledger,
        )
        .await?;
        if !append.rows.is_empty() {
            self.sink
                .append(&tables.raw_ledger, &append.header, &append.rows)
                .await
                .with_context(|| format!("appending to {}", tables.raw_ledger))?;
        }

        let recomputed = if append.rows.is_empty() {
            debug!("no new ledger rows; daily views left as they are");
            None
        } else {
            self.refresh_sales_views().await?
        };
        let daily_days = recomputed.as_ref().map(Vec::len);
        let daily = match recomputed {
            Some(daily) => daily,
            None => {
                let table = self
                    .sink
                    .read(&tables.daily_totals)
                    .await
                    .with_context(|| format!("reading {}", tables.daily_totals))?;
                views::daily_totals_from_table(&table)
            }
        };

        let ads = self.collect_ad_exports().await?;
        self.sink
            .replace(&tables.ad_metrics, &ads)
            .await
            .with_context(|| format!("writing {}", tables.ad_metrics))?;

        let impact = views::compute_impact(
            &daily,
            &ads,
            &self.pipeline.ads,
            self.pipeline.average_ticket_price,
        );
        match &impact {
            Some(rows) => self
                .sink
                .replace(&tables.impact, &views::impact_table(rows))
                .await
                .with_context(|| format!("writing {}", tables.impact))?,
            None => warn!(
                table = %tables.ad_metrics,
                "ad columns missing; impact view left as it was"
            ),
        }

        let parquet_manifest = if self.config.export_parquet {
            let run_dir = self.config.reports_dir.join(run_id.to_string());
            let manifest = report::export_parquet_snapshots(
                &run_dir,
                &run_id.to_string(),
                &daily,
                impact.as_deref().unwrap_or_default(),
            )?;
            Some(manifest.display().to_string())
        } else {
            None
        };

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            ingested_artifacts: append.ingested,
            appended_rows: append.rows.len(),
            daily_days,
            ad_rows: ads.rows.len(),
            impact_days: impact.as_ref().map(Vec::len),
            parquet_manifest,
        })
    }

    /// Rebuild the daily totals and snapshot deltas from the entire ledger.
    /// Returns `None` when the ledger lacks a configured sales column.
    async fn refresh_sales_views(&self) -> Result<Option<Vec<DailyTotal>>> {
        let tables = &self.pipeline.tables;
        let ledger = self
            .sink
            .read(&tables.raw_ledger)
            .await
            .with_context(|| format!("reading {}", tables.raw_ledger))?;

        let Some(daily) = views::compute_daily_totals(&ledger, &self.pipeline.sales) else {
            warn!(
                table = %tables.raw_ledger,
                "sales columns missing; daily totals left as they were"
            );
            return Ok(None);
        };
        self.sink
            .replace(
                &tables.daily_totals,
                &views::daily_totals_table(&daily, &self.pipeline.sales),
            )
            .await
            .with_context(|| format!("writing {}", tables.daily_totals))?;

        match views::compute_snapshot_deltas(&ledger, &self.pipeline.sales) {
            Some(deltas) => self
                .sink
                .replace(&tables.sales_deltas, &deltas)
                .await
                .with_context(|| format!("writing {}", tables.sales_deltas))?,
            None => warn!("delta key columns missing; sales deltas left as they were"),
        }

        Ok(Some(daily))
    }

    /// Fetch every ad export under every configured prefix and flatten them.
    async fn collect_ad_exports(&self) -> Result<Table> {
        let adapter = AdExportAdapter;
        let mut parsed = Vec::new();
        for prefix in &self.pipeline.ad_prefixes {
            let listed = self
                .source
                .list(prefix)
                .await
                .with_context(|| format!("listing ad exports under {prefix}"))?;
            for reference in listed {
                let artifact = adapter
                    .fetch(self.source.as_ref(), &reference)
                    .await
                    .with_context(|| format!("fetching ad export {}", reference.path))?;
                match adapter
                    .parse(&artifact)
                    .with_context(|| format!("parsing ad export {}", reference.path))?
                {
                    Some(p) => parsed.push(p),
                    None => debug!(artifact = %reference.name, "empty ad export skipped"),
                }
            }
        }
        let merged = views::merge_ad_exports(&parsed).context("merging ad exports")?;
        info!(exports = parsed.len(), rows = merged.rows.len(), "ad exports merged");
        Ok(merged)
    }

    pub async fn outcome_history(&self) -> Result<Vec<SyncOutcome>> {
        self.outcome_log().history().await
    }
}

/// Scheduler that runs the pipeline on `config.sync_cron`, or `None` when
/// scheduling is disabled.
pub async fn maybe_build_scheduler(pipeline: Arc<SyncPipeline>) -> Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = pipeline.config.sync_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            match pipeline.run_once().await {
                Ok(summary) => info!(run_id = %summary.run_id, "scheduled sync complete"),
                Err(SyncError::RunInProgress { lock_path, .. }) => {
                    warn!(lock = %lock_path, "previous sync still running; skipping this tick")
                }
                Err(err) => warn!(error = %format!("{err:#}"), "scheduled sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

pub fn pipeline_from_env() -> Result<SyncPipeline> {
    let config = SyncConfig::from_env();
    let pipeline = PipelineConfig::load(&config.pipeline_config_path)?;
    Ok(SyncPipeline::new(config, pipeline))
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary, SyncError> {
    pipeline_from_env()?.run_once().await
}
