use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[cfg(feature = "metrics-server")]
pub mod server;

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub total_duration_ms: f64,
    pub units_completed: u64,
    pub units_failed: u64,
    pub units_skipped: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsSnapshot::default())),
        }
    }

    pub fn start_stage(&self, stage_name: &str) -> StageTimer {
        StageTimer {
            stage: stage_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            failed: false,
            recorded: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn record_unit_completed(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.units_completed += 1;
        }
    }

    pub fn record_unit_failed(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.units_failed += 1;
        }
    }

    pub fn record_units_skipped(&self, count: u64) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.units_skipped += count;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

pub struct StageTimer {
    stage: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    failed: bool,
    recorded: bool,
}

impl StageTimer {
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration = self.started_at.elapsed();
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.stages.entry(self.stage.clone()).or_default();
            metrics.calls += 1;
            if self.failed {
                metrics.failures += 1;
            }
            let duration_ms = duration.as_secs_f64() * 1_000.0;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            stage = self.stage.as_str(),
            duration_ms = duration.as_secs_f64() * 1_000.0,
            failed = self.failed,
            "Stage duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        units_completed = snapshot.units_completed,
        units_failed = snapshot.units_failed,
        units_skipped = snapshot.units_skipped,
        "Harness metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            failures = metrics.failures,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Stage metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        for (name, help, value) in [
            (
                "cycle_bench_units_completed_total",
                "Units whose pipeline and report completed",
                self.units_completed,
            ),
            (
                "cycle_bench_units_failed_total",
                "Units that failed at a stage or while reporting",
                self.units_failed,
            ),
            (
                "cycle_bench_units_skipped_total",
                "Units never started because the run halted",
                self.units_skipped,
            ),
        ] {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name} {value}\n"));
        }
        output.push_str("# HELP cycle_bench_stage_calls_total Stage invocation count\n");
        output.push_str("# TYPE cycle_bench_stage_calls_total counter\n");
        output.push_str("# HELP cycle_bench_stage_failures_total Stage failure count\n");
        output.push_str("# TYPE cycle_bench_stage_failures_total counter\n");
        output.push_str(
            "# HELP cycle_bench_stage_duration_seconds_total Accumulated stage duration in seconds\n",
        );
        output.push_str("# TYPE cycle_bench_stage_duration_seconds_total counter\n");
        output.push_str(
            "# HELP cycle_bench_stage_duration_seconds_max Maximum stage duration in seconds\n",
        );
        output.push_str("# TYPE cycle_bench_stage_duration_seconds_max gauge\n");
        for (stage, metrics) in &self.stages {
            output.push_str(&format!(
                "cycle_bench_stage_calls_total{{stage=\"{}\"}} {}\n",
                stage, metrics.calls
            ));
            output.push_str(&format!(
                "cycle_bench_stage_failures_total{{stage=\"{}\"}} {}\n",
                stage, metrics.failures
            ));
            output.push_str(&format!(
                "cycle_bench_stage_duration_seconds_total{{stage=\"{}\"}} {:.6}\n",
                stage,
                metrics.total_duration_ms / 1_000.0
            ));
            output.push_str(&format!(
                "cycle_bench_stage_duration_seconds_max{{stage=\"{}\"}} {:.6}\n",
                stage,
                metrics.max_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP cycle_bench_run_duration_seconds Total harness run duration\n");
        output.push_str("# TYPE cycle_bench_run_duration_seconds gauge\n");
        output.push_str(&format!(
            "cycle_bench_run_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}
