use crate::pipeline::{PipelineContext, Stage};
use crate::process::{CommandSpec, StageBackend, StageOutcome};
use crate::unit::WorkUnit;

pub const RELOCATE_INPUT: &str = "relocate-input";
pub const INPUT_GENERATOR: &str = "input-generator";
pub const RELOCATE_PROCESSED: &str = "relocate-processed";
pub const CIRCUIT: &str = "circuit";

pub fn standard_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(RelocateInputStage),
        Box::new(InputGeneratorStage),
        Box::new(RelocateProcessedStage),
        Box::new(CircuitStage),
    ]
}

pub fn standard_stage_names() -> [&'static str; 4] {
    [RELOCATE_INPUT, INPUT_GENERATOR, RELOCATE_PROCESSED, CIRCUIT]
}

/// Copies the raw block dataset into the input generator's staging area.
pub struct RelocateInputStage;

impl Stage for RelocateInputStage {
    fn name(&self) -> &'static str {
        RELOCATE_INPUT
    }

    fn run(
        &self,
        unit: WorkUnit,
        ctx: &PipelineContext,
        backend: &dyn StageBackend,
    ) -> StageOutcome {
        let source = ctx.data_root.join(unit.dir_name());
        let target = ctx.config.input_generator.staging_dir.join(unit.dir_name());
        if let Err(err) = backend.ensure_dir(&target) {
            return StageOutcome::failure(format!(
                "Failed to create directory {}: {err}",
                target.display()
            ));
        }
        match backend.copy_dir(&source, &target) {
            Ok(()) => {
                tracing::debug!(from = %source.display(), to = %target.display(), "Moved block data");
                StageOutcome::Success
            }
            Err(err) => StageOutcome::failure(format!(
                "Failed to move data from {} to {}: {err}",
                source.display(),
                target.display()
            )),
        }
    }
}

pub struct InputGeneratorStage;

impl Stage for InputGeneratorStage {
    fn name(&self) -> &'static str {
        INPUT_GENERATOR
    }

    fn run(
        &self,
        unit: WorkUnit,
        ctx: &PipelineContext,
        backend: &dyn StageBackend,
    ) -> StageOutcome {
        let spec = &ctx.config.input_generator;
        let command = CommandSpec::new(&spec.program, &spec.working_dir)
            .args(spec.args.iter().cloned())
            .arg("--exact")
            .arg(unit.txnum.to_string());
        backend.run_command(&command)
    }
}

/// Moves this unit's processed output, and only this unit's, into the
/// execution engine's staging area.
pub struct RelocateProcessedStage;

impl Stage for RelocateProcessedStage {
    fn name(&self) -> &'static str {
        RELOCATE_PROCESSED
    }

    fn run(
        &self,
        unit: WorkUnit,
        ctx: &PipelineContext,
        backend: &dyn StageBackend,
    ) -> StageOutcome {
        let source = ctx.config.input_generator.output_dir.join(unit.dir_name());
        let target = ctx.config.execution.staging_dir.join(unit.dir_name());
        backend
            .copy_dir(&source, &target)
            .map_err(|err| {
                std::io::Error::new(
                    err.kind(),
                    format!(
                        "Failed to move data from {} to {}: {err}",
                        source.display(),
                        target.display()
                    ),
                )
            })
            .into()
    }
}

/// Runs the execution engine in execute-only mode; on success it has written
/// `<metrics.output_dir>/<txnum>.json`.
pub struct CircuitStage;

impl Stage for CircuitStage {
    fn name(&self) -> &'static str {
        CIRCUIT
    }

    fn run(
        &self,
        unit: WorkUnit,
        ctx: &PipelineContext,
        backend: &dyn StageBackend,
    ) -> StageOutcome {
        let spec = &ctx.config.execution;
        let command = CommandSpec::new(&spec.program, &spec.working_dir)
            .args(spec.args.iter().cloned())
            .args(["--execute", "--exact"])
            .arg(unit.txnum.to_string());
        backend.run_command(&command)
    }
}
