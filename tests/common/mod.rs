#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cycle_bench::config::HarnessConfig;
use cycle_bench::process::{
    CommandSpec, StageBackend, StageDiagnostic, StageOutcome, SystemBackend,
};
use serde_json::json;
use tempfile::TempDir;

/// Stands in for the input generator and circuit binaries. File operations
/// go to the real file system.
pub struct FakeTools {
    config: HarnessConfig,
    cycles: BTreeMap<u64, u64>,
    fail_execution: BTreeSet<u64>,
    fail_generator: BTreeSet<u64>,
    pub commands: Mutex<Vec<CommandSpec>>,
}

impl FakeTools {
    pub fn new(config: &HarnessConfig, cycles: &[(u64, u64)]) -> Self {
        Self {
            config: config.clone(),
            cycles: cycles.iter().copied().collect(),
            fail_execution: BTreeSet::new(),
            fail_generator: BTreeSet::new(),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_execution(mut self, txnum: u64) -> Self {
        self.fail_execution.insert(txnum);
        self
    }

    pub fn failing_generator(mut self, txnum: u64) -> Self {
        self.fail_generator.insert(txnum);
        self
    }

    fn txnum_of(command: &CommandSpec) -> u64 {
        command
            .args
            .last()
            .and_then(|arg| arg.parse().ok())
            .expect("command ends with txnum")
    }
}

impl StageBackend for FakeTools {
    fn run_command(&self, command: &CommandSpec) -> StageOutcome {
        self.commands.lock().unwrap().push(command.clone());
        let txnum = Self::txnum_of(command);
        let dir_name = format!("block-{txnum}txs");

        if command.args.iter().any(|arg| arg == "--execute") {
            if self.fail_execution.contains(&txnum) {
                return StageOutcome::Failure(StageDiagnostic {
                    message: "exit status: 101".into(),
                    exit_code: Some(101),
                    stdout: format!("executing {txnum}\n").into_bytes(),
                    stderr: b"assertion failed: roots mismatch\n".to_vec(),
                });
            }
            if !self.config.execution.staging_dir.join(&dir_name).is_dir() {
                return StageOutcome::failure("processed data missing");
            }
            let Some(&cycles) = self.cycles.get(&txnum) else {
                return StageOutcome::Success;
            };
            let record = json!({
                "total_instructions": cycles,
                "acc_size": 4096,
                "block_size": 1000 + txnum,
                "block_height": 800_000 + txnum,
                "tx_count": txnum,
            });
            fs::create_dir_all(&self.config.metrics.output_dir).unwrap();
            fs::write(
                self.config.metrics.output_dir.join(format!("{txnum}.json")),
                serde_json::to_vec_pretty(&record).unwrap(),
            )
            .unwrap();
            StageOutcome::Success
        } else {
            if self.fail_generator.contains(&txnum) {
                return StageOutcome::failure("input generator exited with 1");
            }
            let staged = self.config.input_generator.staging_dir.join(&dir_name);
            let processed = self.config.input_generator.output_dir.join(&dir_name);
            SystemBackend.copy_dir(&staged, &processed).into()
        }
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        SystemBackend.ensure_dir(path)
    }

    fn copy_dir(&self, from: &Path, to: &Path) -> io::Result<()> {
        SystemBackend.copy_dir(from, to)
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        SystemBackend.write_file(path, contents)
    }

    fn remove_path(&self, path: &Path) -> io::Result<()> {
        SystemBackend.remove_path(path)
    }
}

pub struct Fixture {
    pub temp: TempDir,
    pub config: HarnessConfig,
}

impl Fixture {
    /// Creates `block-<txnum>txs` directories under both data roots and one
    /// baseline artifact per `(txnum, baseline_cycles)` pair.
    pub fn new(baselines: &[(u64, u64)]) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = HarnessConfig::default().resolve(temp.path());
        config.input_generator.program = "input-gen".into();
        config.input_generator.args = Vec::new();
        config.execution.program = "circuit".into();
        config.execution.args = vec!["--release-profile".into()];

        for root in [&config.data_root, &config.test_data_root] {
            for (txnum, _) in baselines {
                let dir = root.join(format!("block-{txnum}txs"));
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join("block.txt"), format!("block {txnum}")).unwrap();
                fs::write(dir.join("block-height.txt"), "800000").unwrap();
            }
        }
        fs::create_dir_all(&config.metrics.baseline_dir).unwrap();
        for (txnum, baseline_cycles) in baselines {
            let record = json!({
                "total_instructions": baseline_cycles,
                "acc_size": 4096,
                "block_size": 1000 + txnum,
                "block_height": 800_000 + txnum,
            });
            fs::write(
                config.metrics.baseline_dir.join(format!("{txnum}.json")),
                record.to_string(),
            )
            .unwrap();
        }
        Self { temp, config }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.temp.path().join(relative)
    }
}
