use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::MetricsSpec;
use crate::error::MetricsError;

/// Performance record written by the execution engine after a successful
/// `--execute` run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetricsRecord {
    pub block_height: u64,
    pub block_size: u64,
    pub total_instructions: u64,
    pub acc_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_count: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LoadedRecord {
    pub path: PathBuf,
    pub record: MetricsRecord,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct MetricsReader {
    output_dir: PathBuf,
    baseline_dir: PathBuf,
}

impl MetricsReader {
    pub fn new(output_dir: impl Into<PathBuf>, baseline_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            baseline_dir: baseline_dir.into(),
        }
    }

    pub fn from_spec(spec: &MetricsSpec) -> Self {
        Self::new(&spec.output_dir, &spec.baseline_dir)
    }

    pub fn metrics_path(&self, txnum: u64) -> PathBuf {
        artifact_path(&self.output_dir, txnum)
    }

    pub fn baseline_path(&self, txnum: u64) -> PathBuf {
        artifact_path(&self.baseline_dir, txnum)
    }

    pub fn read_metrics(&self, txnum: u64) -> Result<LoadedRecord, MetricsError> {
        load_record(&self.metrics_path(txnum))
    }

    pub fn read_baseline(&self, txnum: u64) -> Result<LoadedRecord, MetricsError> {
        load_record(&self.baseline_path(txnum))
    }
}

pub fn artifact_path(dir: &Path, txnum: u64) -> PathBuf {
    dir.join(format!("{txnum}.json"))
}

pub fn load_record(path: &Path) -> Result<LoadedRecord, MetricsError> {
    let bytes = fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => MetricsError::NotFound {
            path: path.to_path_buf(),
        },
        _ => MetricsError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let record = serde_json::from_slice(&bytes).map_err(|source| MetricsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(LoadedRecord {
        path: path.to_path_buf(),
        record,
        sha256: format!("{:x}", Sha256::digest(&bytes)),
    })
}

/// Loads every `*.json` record in `dir`, sorted by file name.
pub fn read_dir(dir: &Path) -> Result<Vec<LoadedRecord>, MetricsError> {
    let entries = fs::read_dir(dir).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => MetricsError::NotFound {
            path: dir.to_path_buf(),
        },
        _ => MetricsError::Io {
            path: dir.to_path_buf(),
            source,
        },
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MetricsError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(|path| load_record(path)).collect()
}
