use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{HarnessConfig, RunMode};
use crate::error::ReportError;
use crate::metrics::MetricsReader;
use crate::observability::MetricsCollector;
use crate::process::{StageBackend, StageDiagnostic, StageOutcome};
use crate::report::{Aggregator, UnitReport, render_completion, render_division_by_zero};
use crate::stages;
use crate::unit::WorkUnit;

#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: HarnessConfig,
    pub data_root: PathBuf,
    pub mode: RunMode,
    pub color: bool,
    pub quiet: bool,
}

impl PipelineContext {
    pub fn new(config: HarnessConfig, mode: RunMode) -> Self {
        let data_root = config.data_root_for(mode).to_path_buf();
        Self {
            config,
            data_root,
            mode,
            color: false,
            quiet: false,
        }
    }
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(
        &self,
        unit: WorkUnit,
        ctx: &PipelineContext,
        backend: &dyn StageBackend,
    ) -> StageOutcome;
}

#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub stage: &'static str,
    pub txnum: u64,
    pub message: String,
    pub exit_code: Option<i32>,
    pub log_path: Option<PathBuf>,
    #[serde(skip)]
    pub diagnostic: StageDiagnostic,
}

#[derive(Debug)]
pub enum UnitOutcome {
    Completed(UnitReport),
    StageFailed(StageFailure),
    ReportFailed(ReportError),
    Panicked(String),
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Completed(_))
    }

    /// Whether this outcome aborts the run under `mode`. A zero instruction
    /// count is never fatal.
    pub fn is_fatal(&self, mode: RunMode) -> bool {
        if !mode.is_fail_fast() {
            return false;
        }
        match self {
            UnitOutcome::Completed(_) => false,
            UnitOutcome::StageFailed(_) | UnitOutcome::Panicked(_) => true,
            UnitOutcome::ReportFailed(err) => !err.is_division_by_zero(),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            UnitOutcome::Completed(_) => "completed",
            UnitOutcome::StageFailed(_) => "stage-failed",
            UnitOutcome::ReportFailed(err) if err.is_division_by_zero() => "division-by-zero",
            UnitOutcome::ReportFailed(_) => "report-failed",
            UnitOutcome::Panicked(_) => "panicked",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            UnitOutcome::Completed(report) => {
                format!("completed with improvement {:.4}", report.stats.improvement)
            }
            UnitOutcome::StageFailed(failure) => {
                format!("stage '{}' failed: {}", failure.stage, failure.message)
            }
            UnitOutcome::ReportFailed(err) => format!("report failed: {err}"),
            UnitOutcome::Panicked(message) => format!("pipeline panicked: {message}"),
        }
    }
}

pub struct UnitPipeline {
    stages: Vec<Box<dyn Stage>>,
    ctx: PipelineContext,
    backend: Arc<dyn StageBackend>,
    reader: MetricsReader,
    aggregator: Arc<Aggregator>,
    metrics: MetricsCollector,
}

impl UnitPipeline {
    pub fn new(
        stages: Vec<Box<dyn Stage>>,
        ctx: PipelineContext,
        backend: Arc<dyn StageBackend>,
        aggregator: Arc<Aggregator>,
        metrics: MetricsCollector,
    ) -> Self {
        let reader = MetricsReader::from_spec(&ctx.config.metrics);
        Self {
            stages,
            ctx,
            backend,
            reader,
            aggregator,
            metrics,
        }
    }

    /// The four-stage relocate → generate → relocate → execute pipeline.
    pub fn standard(
        ctx: PipelineContext,
        backend: Arc<dyn StageBackend>,
        aggregator: Arc<Aggregator>,
        metrics: MetricsCollector,
    ) -> Self {
        Self::new(stages::standard_stages(), ctx, backend, aggregator, metrics)
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    #[instrument(skip(self), fields(txnum = unit.txnum))]
    pub fn run(&self, unit: WorkUnit) -> UnitOutcome {
        for stage in &self.stages {
            let span = tracing::span!(tracing::Level::DEBUG, "stage", stage = stage.name());
            let _span_guard = span.enter();
            let mut timer = self.metrics.start_stage(stage.name());
            match stage.run(unit, &self.ctx, self.backend.as_ref()) {
                StageOutcome::Success => debug!("Stage succeeded"),
                StageOutcome::Failure(diagnostic) => {
                    timer.mark_failed();
                    drop(timer);
                    let failure = self.fail_stage(unit, stage.name(), diagnostic);
                    return UnitOutcome::StageFailed(failure);
                }
            }
        }
        self.report(unit)
    }

    fn fail_stage(
        &self,
        unit: WorkUnit,
        stage: &'static str,
        diagnostic: StageDiagnostic,
    ) -> StageFailure {
        let log_path = self
            .ctx
            .config
            .logs_dir
            .join(format!("{stage}-error-{}.log", unit.txnum));
        let log_path = match self
            .backend
            .write_file(&log_path, &diagnostic.log_contents())
        {
            Ok(()) => Some(log_path),
            Err(err) => {
                warn!(
                    path = %log_path.display(),
                    error = %err,
                    "Failed to write stage diagnostic log"
                );
                None
            }
        };
        let log_display = log_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<not written>".to_string());

        if self.ctx.mode.is_fail_fast() {
            error!(
                stage,
                txnum = unit.txnum,
                log = %log_display,
                stdout = %String::from_utf8_lossy(&diagnostic.stdout),
                stderr = %String::from_utf8_lossy(&diagnostic.stderr),
                "{}",
                diagnostic.message
            );
        } else {
            warn!(
                stage,
                txnum = unit.txnum,
                log = %log_display,
                "Stage failed: {}",
                diagnostic.message
            );
        }

        StageFailure {
            stage,
            txnum: unit.txnum,
            message: diagnostic.message.clone(),
            exit_code: diagnostic.exit_code,
            log_path,
            diagnostic,
        }
    }

    fn report(&self, unit: WorkUnit) -> UnitOutcome {
        let txnum = unit.txnum;
        let loaded = self.reader.read_metrics(txnum).and_then(|metrics| {
            self.reader
                .read_baseline(txnum)
                .map(|baseline| (metrics, baseline))
        });
        let (metrics, baseline) = match loaded {
            Ok(pair) => pair,
            Err(err) => {
                if self.ctx.mode.is_fail_fast() {
                    error!(txnum, error = %err, "Failed to load metrics");
                } else {
                    warn!(txnum, error = %err, "Failed to load metrics");
                }
                return UnitOutcome::ReportFailed(err.into());
            }
        };

        match self.aggregator.record(txnum, &metrics, &baseline) {
            Ok(report) => {
                if !self.ctx.quiet {
                    let mut out = io::stdout().lock();
                    let _ = writeln!(out, "{}", render_completion(&report, self.ctx.color));
                }
                info!(
                    txnum,
                    improvement = report.stats.improvement,
                    max_time = report.stats.max_time,
                    "Unit completed"
                );
                UnitOutcome::Completed(report)
            }
            Err(err) => {
                if err.is_division_by_zero() && !self.ctx.quiet {
                    println!(
                        "{}",
                        render_division_by_zero(
                            txnum,
                            baseline.record.total_instructions,
                            self.ctx.color
                        )
                    );
                }
                warn!(txnum, error = %err, "Unit report not recorded");
                UnitOutcome::ReportFailed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;
    use crate::process::CommandSpec;
    use tempfile::tempdir;

    #[derive(Default)]
    struct ScriptedBackend {
        fail_program: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    impl StageBackend for ScriptedBackend {
        fn run_command(&self, command: &CommandSpec) -> StageOutcome {
            self.calls.lock().unwrap().push(command.display());
            if self.fail_program.as_deref() == Some(command.program.as_str()) {
                return StageOutcome::Failure(StageDiagnostic {
                    message: "exit status: 3".into(),
                    exit_code: Some(3),
                    stdout: b"building\n".to_vec(),
                    stderr: b"panicked at main.rs\n".to_vec(),
                });
            }
            StageOutcome::Success
        }

        fn ensure_dir(&self, path: &Path) -> io::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("mkdir {}", path.display()));
            Ok(())
        }

        fn copy_dir(&self, from: &Path, _to: &Path) -> io::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("copy {}", from.display()));
            Ok(())
        }

        fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            std::fs::create_dir_all(path.parent().unwrap())?;
            std::fs::write(path, contents)
        }

        fn remove_path(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
    }

    fn context(root: &Path, mode: RunMode) -> PipelineContext {
        let mut config = HarnessConfig::default().resolve(root);
        config.input_generator.program = "input-gen".into();
        config.input_generator.args = Vec::new();
        config.execution.program = "circuit".into();
        config.execution.args = Vec::new();
        let mut ctx = PipelineContext::new(config, mode);
        ctx.quiet = true;
        ctx
    }

    #[test]
    fn failing_stage_short_circuits_and_writes_log() {
        let temp = tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend {
            fail_program: Some("input-gen".into()),
            ..ScriptedBackend::default()
        });
        let aggregator = Arc::new(Aggregator::new());
        let pipeline = UnitPipeline::standard(
            context(temp.path(), RunMode::Normal),
            backend.clone(),
            aggregator.clone(),
            MetricsCollector::new(),
        );

        let outcome = pipeline.run(WorkUnit::new(5));
        let UnitOutcome::StageFailed(failure) = &outcome else {
            panic!("expected stage failure, got {outcome:?}");
        };
        assert_eq!(failure.stage, "input-generator");
        assert!(!outcome.is_fatal(RunMode::Normal));
        assert!(outcome.is_fatal(RunMode::Test));

        let log = temp.path().join("logs/input-generator-error-5.log");
        assert_eq!(failure.log_path.as_deref(), Some(log.as_path()));
        assert_eq!(
            std::fs::read(&log).unwrap(),
            b"building\npanicked at main.rs\n"
        );

        let calls = backend.calls.lock().unwrap();
        assert!(calls.iter().all(|call| !call.starts_with("circuit")));
        assert_eq!(calls.last().unwrap(), "input-gen --exact 5");
        assert!(aggregator.snapshot().is_empty());
    }

    #[test]
    fn missing_metrics_is_report_failure() {
        let temp = tempdir().unwrap();
        let pipeline = UnitPipeline::standard(
            context(temp.path(), RunMode::Test),
            Arc::new(ScriptedBackend::default()),
            Arc::new(Aggregator::new()),
            MetricsCollector::new(),
        );

        let outcome = pipeline.run(WorkUnit::new(8));
        assert_eq!(outcome.status(), "report-failed");
        assert!(outcome.is_fatal(RunMode::Test));
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "relocate-input",
                "input-generator",
                "relocate-processed",
                "circuit"
            ]
        );
    }

    #[test]
    fn division_by_zero_is_never_fatal() {
        let outcome = UnitOutcome::ReportFailed(ReportError::DivisionByZero { txnum: 1 });
        assert_eq!(outcome.status(), "division-by-zero");
        assert!(!outcome.is_fatal(RunMode::Test));
    }
}
