use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::config::{HarnessConfig, RunMode};
use crate::metrics::artifact_path;
use crate::observability::{MetricsCollector, MetricsSnapshot};
use crate::pipeline::{PipelineContext, StageFailure, UnitOutcome, UnitPipeline};
use crate::process::StageBackend;
use crate::report::{AggregateStats, Aggregator, UnitReport};
use crate::scheduler::TaskScheduler;
use crate::unit::{WorkUnit, discover_units};

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub config: HarnessConfig,
    pub mode: RunMode,
    pub workers: Option<usize>,
    pub color: bool,
    pub quiet: bool,
}

impl HarnessOptions {
    pub fn new(config: HarnessConfig, mode: RunMode) -> Self {
        Self {
            config,
            mode,
            workers: None,
            color: false,
            quiet: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UnitEntry {
    pub txnum: u64,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<UnitReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitEntry {
    fn from_outcome(unit: WorkUnit, outcome: UnitOutcome) -> Self {
        let status = outcome.status();
        let mut entry = UnitEntry {
            txnum: unit.txnum,
            status,
            report: None,
            failure: None,
            error: None,
        };
        match outcome {
            UnitOutcome::Completed(report) => entry.report = Some(report),
            UnitOutcome::StageFailed(failure) => {
                entry.error = Some(failure.message.clone());
                entry.failure = Some(failure);
            }
            UnitOutcome::ReportFailed(err) => entry.error = Some(err.to_string()),
            UnitOutcome::Panicked(message) => entry.error = Some(message),
        }
        entry
    }

    fn skipped(unit: WorkUnit) -> Self {
        UnitEntry {
            txnum: unit.txnum,
            status: "skipped",
            report: None,
            failure: None,
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HarnessSummary {
    pub total_units: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub mean_improvement: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct HarnessReport {
    pub generated_at: DateTime<Utc>,
    pub mode: RunMode,
    pub data_root: PathBuf,
    pub workers: usize,
    pub halted: bool,
    pub metrics: MetricsSnapshot,
    /// Entries sorted by txnum.
    pub units: Vec<UnitEntry>,
    pub summary: HarnessSummary,
    /// Aggregate series sorted by txnum, for plotting.
    pub series: AggregateStats,
}

pub fn run_harness(
    options: HarnessOptions,
    backend: Arc<dyn StageBackend>,
) -> Result<HarnessReport> {
    run_harness_with_metrics(options, backend, MetricsCollector::new())
}

/// Same as [`run_harness`] but records into a caller-owned collector, so the
/// snapshot can be served while the run is in progress.
pub fn run_harness_with_metrics(
    options: HarnessOptions,
    backend: Arc<dyn StageBackend>,
    metrics: MetricsCollector,
) -> Result<HarnessReport> {
    let HarnessOptions {
        config,
        mode,
        workers,
        color,
        quiet,
    } = options;
    let span = info_span!("harness", mode = mode.as_str());
    let _span_guard = span.enter();

    let data_root = config.data_root_for(mode).to_path_buf();
    let units = discover_units(&data_root)?;
    info!(
        data_root = %data_root.display(),
        units = units.len(),
        "Discovered work units"
    );

    let teardown = Teardown {
        config: config.clone(),
        units: units.clone(),
        backend: backend.clone(),
    };

    metrics.reset();
    let started = Instant::now();
    let aggregator = Arc::new(Aggregator::new());
    let ctx = PipelineContext {
        config,
        data_root: data_root.clone(),
        mode,
        color,
        quiet,
    };
    let pipeline = UnitPipeline::standard(ctx, backend, aggregator.clone(), metrics.clone());
    let workers = workers.unwrap_or_else(|| pipeline.context().config.worker_count());
    let scheduler = TaskScheduler::new(Some(workers), mode);

    let schedule = scheduler.run_all(
        &units,
        |unit| pipeline.run(unit),
        |unit, outcome| {
            if outcome.is_success() {
                metrics.record_unit_completed();
            } else {
                metrics.record_unit_failed();
                warn!(txnum = unit.txnum, "{}", outcome.describe());
            }
        },
    );
    metrics.record_units_skipped(schedule.skipped.len() as u64);
    metrics.record_total_duration(started.elapsed());
    drop(teardown);

    if let Some((unit, outcome)) = schedule.first_fatal(mode) {
        bail!(
            "Test run aborted: txnum {} {}",
            unit.txnum,
            outcome.describe()
        );
    }

    let halted = schedule.halted;
    let mut entries: Vec<UnitEntry> = schedule
        .outcomes
        .into_iter()
        .map(|(unit, outcome)| UnitEntry::from_outcome(unit, outcome))
        .chain(schedule.skipped.into_iter().map(UnitEntry::skipped))
        .collect();
    entries.sort_by_key(|entry| entry.txnum);

    let series = aggregator.snapshot();
    let completed = entries.iter().filter(|e| e.status == "completed").count();
    let skipped = entries.iter().filter(|e| e.status == "skipped").count();
    let summary = HarnessSummary {
        total_units: entries.len(),
        completed,
        failed: entries.len() - completed - skipped,
        skipped,
        mean_improvement: series.final_mean(),
    };
    info!(
        completed = summary.completed,
        failed = summary.failed,
        mean_improvement = ?summary.mean_improvement,
        "Harness run finished"
    );

    Ok(HarnessReport {
        generated_at: Utc::now(),
        mode,
        data_root,
        workers: scheduler.workers(),
        halted,
        metrics: metrics.snapshot(),
        units: entries,
        summary,
        series: series.sorted(),
    })
}

/// Removes this run's unit-scoped staging directories and metrics artifacts
/// when dropped, including on early return or unwinding.
struct Teardown {
    config: HarnessConfig,
    units: Vec<WorkUnit>,
    backend: Arc<dyn StageBackend>,
}

impl Teardown {
    fn targets(&self) -> Vec<PathBuf> {
        let mut targets = Vec::with_capacity(self.units.len() * 4);
        for unit in &self.units {
            let dir = unit.dir_name();
            targets.push(self.config.input_generator.staging_dir.join(&dir));
            targets.push(self.config.input_generator.output_dir.join(&dir));
            targets.push(self.config.execution.staging_dir.join(&dir));
            targets.push(artifact_path(&self.config.metrics.output_dir, unit.txnum));
        }
        targets
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        let mut failures = 0usize;
        for path in self.targets() {
            if let Err(err) = self.backend.remove_path(&path) {
                failures += 1;
                warn!(path = %path.display(), error = %err, "Teardown failed to remove path");
            }
        }
        info!(units = self.units.len(), failures, "Teardown complete");
    }
}
