mod common;

use std::sync::Arc;

use common::{FakeTools, Fixture};
use cycle_bench::config::RunMode;
use cycle_bench::observability::MetricsCollector;
use cycle_bench::pipeline::{PipelineContext, UnitOutcome, UnitPipeline};
use cycle_bench::report::Aggregator;
use cycle_bench::unit::WorkUnit;

fn build_pipeline(
    fixture: &Fixture,
    tools: FakeTools,
) -> (UnitPipeline, Arc<Aggregator>, MetricsCollector) {
    let mut ctx = PipelineContext::new(fixture.config.clone(), RunMode::Normal);
    ctx.quiet = true;
    let aggregator = Arc::new(Aggregator::new());
    let metrics = MetricsCollector::new();
    let pipeline =
        UnitPipeline::standard(ctx, Arc::new(tools), aggregator.clone(), metrics.clone());
    (pipeline, aggregator, metrics)
}

#[test]
fn pipeline_runs_all_stages_and_records_stats() {
    let fixture = Fixture::new(&[(7, 2000)]);
    let tools = FakeTools::new(&fixture.config, &[(7, 1000)]);
    let (pipeline, aggregator, metrics) = build_pipeline(&fixture, tools);

    let outcome = pipeline.run(WorkUnit::new(7));

    let UnitOutcome::Completed(report) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(report.txnum, 7);
    assert_eq!(report.cycles, 1000);
    assert_eq!(report.baseline_cycles, 2000);
    assert_eq!(report.stats.improvement, 2.0);
    assert_eq!(report.stats.min_time, 1000.0 / 25_000_000.0);
    assert_eq!(report.stats.max_time, 1000.0 / 10_000_000.0);
    assert_eq!(report.stats.coefficient, Some(1007.0 * 12.0 / 1000.0));
    assert_eq!(report.running_mean, 2.0);

    assert!(
        fixture
            .path("input-generator/acc-data/block-7txs/block.txt")
            .is_file()
    );
    assert!(fixture.path("circuit/acc-data/block-7txs/block.txt").is_file());

    let snapshot = metrics.snapshot();
    for stage in [
        "relocate-input",
        "input-generator",
        "relocate-processed",
        "circuit",
    ] {
        let stage_metrics = snapshot.stages.get(stage).unwrap();
        assert_eq!(stage_metrics.calls, 1, "{stage}");
        assert_eq!(stage_metrics.failures, 0, "{stage}");
    }
    assert_eq!(aggregator.snapshot().len(), 1);
}

#[test]
fn missing_source_directory_fails_first_stage() {
    let fixture = Fixture::new(&[(7, 2000)]);
    let tools = FakeTools::new(&fixture.config, &[(99, 10)]);
    let (pipeline, aggregator, metrics) = build_pipeline(&fixture, tools);

    let outcome = pipeline.run(WorkUnit::new(99));

    let UnitOutcome::StageFailed(failure) = outcome else {
        panic!("expected stage failure, got {outcome:?}");
    };
    assert_eq!(failure.stage, "relocate-input");
    assert!(failure.message.contains("Failed to move data"));
    assert!(fixture.path("logs/relocate-input-error-99.log").is_file());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.stages.get("relocate-input").unwrap().failures, 1);
    assert!(!snapshot.stages.contains_key("input-generator"));
    assert!(aggregator.snapshot().is_empty());
}

#[test]
fn running_mean_tracks_completion_order() {
    let fixture = Fixture::new(&[(1, 200), (2, 400), (3, 600)]);
    let tools = FakeTools::new(&fixture.config, &[(1, 100), (2, 100), (3, 100)]);
    let (pipeline, aggregator, _) = build_pipeline(&fixture, tools);

    let means: Vec<f64> = [3, 1, 2]
        .into_iter()
        .map(|txnum| match pipeline.run(WorkUnit::new(txnum)) {
            UnitOutcome::Completed(report) => report.running_mean,
            other => panic!("unit {txnum} failed: {other:?}"),
        })
        .collect();

    assert_eq!(means, vec![6.0, 4.0, 4.0]);
    assert_eq!(aggregator.snapshot().final_mean(), Some(4.0));
}
