use std::path::Path;

use serde::Serialize;

use crate::config::HarnessConfig;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_config(config: &HarnessConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.version != 1 {
        report
            .errors
            .push(format!("Unsupported config version: {}", config.version));
    }

    if config.workers == Some(0) {
        report
            .errors
            .push("Worker count must be at least 1".into());
    }

    report.merge(validate_tool(
        "input_generator",
        &config.input_generator.program,
        &config.input_generator.working_dir,
    ));
    report.merge(validate_tool(
        "execution",
        &config.execution.program,
        &config.execution.working_dir,
    ));

    for (label, path) in [
        ("data_root", &config.data_root),
        ("test_data_root", &config.test_data_root),
        ("logs_dir", &config.logs_dir),
        ("input_generator.staging_dir", &config.input_generator.staging_dir),
        ("input_generator.output_dir", &config.input_generator.output_dir),
        ("execution.staging_dir", &config.execution.staging_dir),
        ("metrics.output_dir", &config.metrics.output_dir),
        ("metrics.baseline_dir", &config.metrics.baseline_dir),
    ] {
        if path.as_os_str().is_empty() {
            report.errors.push(format!("{label} cannot be empty"));
        }
    }

    if config.metrics.output_dir == config.metrics.baseline_dir {
        report.errors.push(
            "metrics.output_dir and metrics.baseline_dir must differ; teardown would delete the baseline"
                .into(),
        );
    }

    if !config.data_root.is_dir() {
        report.warnings.push(format!(
            "Data root does not exist: {}",
            config.data_root.display()
        ));
    }
    if !config.test_data_root.is_dir() {
        report.warnings.push(format!(
            "Test data root does not exist: {}",
            config.test_data_root.display()
        ));
    }
    if !config.metrics.baseline_dir.is_dir() {
        report.warnings.push(format!(
            "Baseline directory does not exist: {}",
            config.metrics.baseline_dir.display()
        ));
    }

    report
}

fn validate_tool(label: &str, program: &str, working_dir: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();
    if program.trim().is_empty() {
        report
            .errors
            .push(format!("{label}.program cannot be empty"));
    }
    if working_dir.as_os_str().is_empty() {
        report
            .errors
            .push(format!("{label}.working_dir cannot be empty"));
    } else if !working_dir.is_dir() {
        report.warnings.push(format!(
            "{label}.working_dir does not exist: {}",
            working_dir.display()
        ));
    }
    report
}
