use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    #[default]
    Normal,
    Test,
}

impl RunMode {
    pub fn is_fail_fast(self) -> bool {
        matches!(self, RunMode::Test)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Normal => "normal",
            RunMode::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub version: u32,
    pub data_root: PathBuf,
    pub test_data_root: PathBuf,
    pub logs_dir: PathBuf,
    pub workers: Option<usize>,
    pub input_generator: InputGeneratorSpec,
    pub execution: ExecutionSpec,
    pub metrics: MetricsSpec,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            version: 1,
            data_root: PathBuf::from("server/acc-datas"),
            test_data_root: PathBuf::from("test-data/acc-datas"),
            logs_dir: PathBuf::from("logs"),
            workers: None,
            input_generator: InputGeneratorSpec::default(),
            execution: ExecutionSpec::default(),
            metrics: MetricsSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputGeneratorSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for InputGeneratorSpec {
    fn default() -> Self {
        Self {
            program: "cargo".to_string(),
            args: vec!["run".to_string(), "--".to_string()],
            working_dir: PathBuf::from("input-generator"),
            staging_dir: PathBuf::from("input-generator/acc-data"),
            output_dir: PathBuf::from("input-generator/processed-acc-data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub staging_dir: PathBuf,
}

impl Default for ExecutionSpec {
    fn default() -> Self {
        Self {
            program: "cargo".to_string(),
            args: vec![
                "run".to_string(),
                "--release".to_string(),
                "--".to_string(),
            ],
            working_dir: PathBuf::from("circuit/script"),
            staging_dir: PathBuf::from("circuit/acc-data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsSpec {
    pub output_dir: PathBuf,
    pub baseline_dir: PathBuf,
}

impl Default for MetricsSpec {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("circuit/metrics-cycles-new"),
            baseline_dir: PathBuf::from("circuit/metrics-cycles"),
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read harness config: {}", path.display()))?;
        let config: HarnessConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse harness config YAML: {}", path.display()))?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config.resolve(&base))
    }

    /// Loads `path` when given, otherwise the built-in layout rooted at the
    /// current directory.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let cwd = std::env::current_dir().context("Failed to determine current directory")?;
                Ok(Self::default().resolve(&cwd))
            }
        }
    }

    pub fn resolve(mut self, base: &Path) -> Self {
        let join = |p: &mut PathBuf| {
            if p.is_relative() && !p.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.data_root);
        join(&mut self.test_data_root);
        join(&mut self.logs_dir);
        join(&mut self.input_generator.working_dir);
        join(&mut self.input_generator.staging_dir);
        join(&mut self.input_generator.output_dir);
        join(&mut self.execution.working_dir);
        join(&mut self.execution.staging_dir);
        join(&mut self.metrics.output_dir);
        join(&mut self.metrics.baseline_dir);
        self
    }

    pub fn data_root_for(&self, mode: RunMode) -> &Path {
        match mode {
            RunMode::Normal => &self.data_root,
            RunMode::Test => &self.test_data_root,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
