use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::error::ReportError;
use crate::metrics::{LoadedRecord, MetricsRecord};

/// Fastest assumed prover clock, in instructions per second.
pub const MAX_CLOCK_HZ: f64 = 25_000_000.0;
/// Slowest assumed prover clock, in instructions per second.
pub const MIN_CLOCK_HZ: f64 = 10_000_000.0;

const RED: &str = "\x1b[91m";
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const BLUE: &str = "\x1b[94m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedStats {
    pub min_time: f64,
    pub max_time: f64,
    pub improvement: f64,
    /// `block_size * log2(acc_size) / total_instructions`; absent for an
    /// empty accumulator.
    pub coefficient: Option<f64>,
}

pub fn improvement(txnum: u64, baseline_cycles: u64, cycles: u64) -> Result<f64, ReportError> {
    if cycles == 0 {
        return Err(ReportError::DivisionByZero { txnum });
    }
    Ok(baseline_cycles as f64 / cycles as f64)
}

pub fn derive_stats(
    txnum: u64,
    metrics: &MetricsRecord,
    baseline: &MetricsRecord,
) -> Result<DerivedStats, ReportError> {
    let improvement = improvement(
        txnum,
        baseline.total_instructions,
        metrics.total_instructions,
    )?;
    let cycles = metrics.total_instructions as f64;
    let coefficient = (metrics.acc_size > 0)
        .then(|| metrics.block_size as f64 * (metrics.acc_size as f64).log2() / cycles);
    Ok(DerivedStats {
        min_time: cycles / MAX_CLOCK_HZ,
        max_time: cycles / MIN_CLOCK_HZ,
        improvement,
        coefficient,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Regression,
    Modest,
    Strong,
    Exceptional,
}

impl Severity {
    pub fn for_improvement(value: f64) -> Self {
        if value < 1.0 {
            Severity::Regression
        } else if value < 10.0 {
            Severity::Modest
        } else if value < 100.0 {
            Severity::Strong
        } else {
            Severity::Exceptional
        }
    }

    fn color(self) -> &'static str {
        match self {
            Severity::Regression => RED,
            Severity::Modest => YELLOW,
            Severity::Strong => GREEN,
            Severity::Exceptional => BLUE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeBand {
    Fast,
    Moderate,
    Slow,
}

impl TimeBand {
    pub fn for_seconds(seconds: f64) -> Self {
        if seconds < 180.0 {
            TimeBand::Fast
        } else if seconds < 300.0 {
            TimeBand::Moderate
        } else {
            TimeBand::Slow
        }
    }

    fn color(self) -> &'static str {
        match self {
            TimeBand::Fast => GREEN,
            TimeBand::Moderate => YELLOW,
            TimeBand::Slow => RED,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub txnum: u64,
    pub height: u64,
    pub cycles: u64,
    pub baseline_cycles: u64,
    pub stats: DerivedStats,
    pub severity: Severity,
    pub time_band: TimeBand,
    /// Mean improvement over the units recorded so far, in completion order.
    pub running_mean: f64,
    pub artifact_sha256: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateStats {
    pub txnums: Vec<u64>,
    pub heights: Vec<u64>,
    pub cycles: Vec<u64>,
    pub baseline_cycles: Vec<u64>,
    pub improvements: Vec<f64>,
}

impl AggregateStats {
    pub fn len(&self) -> usize {
        self.improvements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.improvements.is_empty()
    }

    pub fn running_mean(&self) -> Option<f64> {
        mean(&self.improvements)
    }

    /// Mean improvement summed in txnum order, independent of completion
    /// order.
    pub fn final_mean(&self) -> Option<f64> {
        let mut pairs: Vec<(u64, f64)> = self
            .txnums
            .iter()
            .copied()
            .zip(self.improvements.iter().copied())
            .collect();
        pairs.sort_by_key(|(txnum, _)| *txnum);
        let ordered: Vec<f64> = pairs.into_iter().map(|(_, value)| value).collect();
        mean(&ordered)
    }

    /// The series sorted by txnum, for plotting.
    pub fn sorted(&self) -> AggregateStats {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&idx| self.txnums[idx]);
        AggregateStats {
            txnums: order.iter().map(|&i| self.txnums[i]).collect(),
            heights: order.iter().map(|&i| self.heights[i]).collect(),
            cycles: order.iter().map(|&i| self.cycles[i]).collect(),
            baseline_cycles: order.iter().map(|&i| self.baseline_cycles[i]).collect(),
            improvements: order.iter().map(|&i| self.improvements[i]).collect(),
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Shared accumulator for one run. Appends and the running-mean recompute
/// happen under one lock.
#[derive(Debug, Default)]
pub struct Aggregator {
    inner: Mutex<AggregateStats>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        txnum: u64,
        metrics: &LoadedRecord,
        baseline: &LoadedRecord,
    ) -> Result<UnitReport, ReportError> {
        let stats = derive_stats(txnum, &metrics.record, &baseline.record)?;

        let running_mean = {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            guard.txnums.push(txnum);
            guard.heights.push(metrics.record.block_height);
            guard.cycles.push(metrics.record.total_instructions);
            guard
                .baseline_cycles
                .push(baseline.record.total_instructions);
            guard.improvements.push(stats.improvement);
            guard.running_mean().unwrap_or(stats.improvement)
        };

        Ok(UnitReport {
            txnum,
            height: metrics.record.block_height,
            cycles: metrics.record.total_instructions,
            baseline_cycles: baseline.record.total_instructions,
            stats,
            severity: Severity::for_improvement(stats.improvement),
            time_band: TimeBand::for_seconds(stats.max_time),
            running_mean,
            artifact_sha256: metrics.sha256.clone(),
        })
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub fn render_unit(report: &UnitReport, color: bool) -> String {
    let (imp_on, time_on, off) = if color {
        (report.severity.color(), report.time_band.color(), RESET)
    } else {
        ("", "", "")
    };
    let coefficient = report
        .stats
        .coefficient
        .map(|c| format!("{c:.6}"))
        .unwrap_or_else(|| "n/a (empty accumulator)".to_string());
    format!(
        "TxNum = {}; Height = {}; Cycles = {}; Baseline Cycles = {}; {imp_on}Improvement = {:.4} times{off}; {time_on}Time = {:.2}s..{:.2}s{off}; Coefficient = {coefficient}",
        report.txnum,
        report.height,
        report.cycles,
        report.baseline_cycles,
        report.stats.improvement,
        report.stats.min_time,
        report.stats.max_time,
    )
}

pub fn render_running_mean(mean: f64, color: bool) -> String {
    if color {
        format!(
            "{}Average improvement atm = {mean:.4}{RESET}",
            Severity::for_improvement(mean).color()
        )
    } else {
        format!("Average improvement atm = {mean:.4}")
    }
}

/// The unit line followed by the running-mean line, as one block so
/// concurrent units cannot interleave between them.
pub fn render_completion(report: &UnitReport, color: bool) -> String {
    format!(
        "{}\n{}",
        render_unit(report, color),
        render_running_mean(report.running_mean, color)
    )
}

pub fn render_division_by_zero(txnum: u64, baseline_cycles: u64, color: bool) -> String {
    let (on, off) = if color { (RED, RESET) } else { ("", "") };
    format!(
        "TxNum = {txnum}; Cycles = 0; Baseline Cycles = {baseline_cycles}; {on}Improvement = undefined (division by zero){off}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total_instructions: u64) -> MetricsRecord {
        MetricsRecord {
            block_height: 840_000,
            block_size: 1_000,
            total_instructions,
            acc_size: 1_024,
            tx_count: None,
        }
    }

    fn loaded(total_instructions: u64) -> LoadedRecord {
        LoadedRecord {
            path: "unused.json".into(),
            record: record(total_instructions),
            sha256: "00".into(),
        }
    }

    #[test]
    fn improvement_ratios_are_exact() {
        assert_eq!(improvement(1, 200, 100).unwrap(), 2.0);
        assert_eq!(improvement(1, 100, 200).unwrap(), 0.5);
        assert_eq!(improvement(1, 0, 200).unwrap(), 0.0);
    }

    #[test]
    fn zero_cycles_is_division_by_zero() {
        let err = derive_stats(9, &record(0), &record(200)).unwrap_err();
        assert!(err.is_division_by_zero());
        assert!(err.to_string().contains("txnum 9"));
    }

    #[test]
    fn derived_stats_follow_cost_model() {
        let stats = derive_stats(3, &record(50_000_000), &record(100_000_000)).unwrap();
        assert_eq!(stats.min_time, 2.0);
        assert_eq!(stats.max_time, 5.0);
        assert_eq!(stats.improvement, 2.0);
        assert_eq!(stats.coefficient, Some(1_000.0 * 10.0 / 50_000_000.0));
    }

    #[test]
    fn empty_accumulator_has_no_coefficient() {
        let mut metrics = record(10);
        metrics.acc_size = 0;
        let stats = derive_stats(3, &metrics, &record(10)).unwrap();
        assert_eq!(stats.coefficient, None);
    }

    #[test]
    fn severity_bands() {
        assert_eq!(Severity::for_improvement(0.5), Severity::Regression);
        assert_eq!(Severity::for_improvement(1.0), Severity::Modest);
        assert_eq!(Severity::for_improvement(42.0), Severity::Strong);
        assert_eq!(Severity::for_improvement(100.0), Severity::Exceptional);
        assert_eq!(TimeBand::for_seconds(179.9), TimeBand::Fast);
        assert_eq!(TimeBand::for_seconds(180.0), TimeBand::Moderate);
        assert_eq!(TimeBand::for_seconds(300.0), TimeBand::Slow);
    }

    #[test]
    fn final_mean_ignores_completion_order() {
        for order in [[1u64, 2, 3], [3, 1, 2], [2, 3, 1]] {
            let aggregator = Aggregator::new();
            for txnum in order {
                // improvements 2.0, 4.0, 6.0 for txnums 1, 2, 3
                aggregator
                    .record(txnum, &loaded(100), &loaded(200 * txnum))
                    .unwrap();
            }
            let snapshot = aggregator.snapshot();
            assert_eq!(snapshot.len(), 3);
            assert_eq!(snapshot.final_mean(), Some(4.0));
            assert_eq!(snapshot.running_mean(), Some(4.0));
            assert_eq!(snapshot.sorted().improvements, vec![2.0, 4.0, 6.0]);
        }
    }

    #[test]
    fn division_by_zero_appends_nothing() {
        let aggregator = Aggregator::new();
        assert!(aggregator.record(5, &loaded(0), &loaded(100)).is_err());
        assert!(aggregator.snapshot().is_empty());
    }

    #[test]
    fn rendered_lines_carry_no_escape_codes_without_color() {
        let aggregator = Aggregator::new();
        let report = aggregator.record(7, &loaded(1000), &loaded(2000)).unwrap();
        let line = render_unit(&report, false);
        assert!(line.starts_with("TxNum = 7; Height = 840000; Cycles = 1000"));
        assert!(line.contains("Improvement = 2.0000 times"));
        assert!(!line.contains('\x1b'));
        assert!(render_unit(&report, true).contains(YELLOW));

        let block = render_completion(&report, false);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], line);
        assert_eq!(lines[1], "Average improvement atm = 2.0000");

        let zero = render_division_by_zero(7, 2000, false);
        assert!(zero.contains("undefined (division by zero)"));
        assert!(!zero.contains("inf") && !zero.contains("NaN"));
    }
}
