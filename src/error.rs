use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics artifact not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read metrics artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed metrics artifact {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl MetricsError {
    pub fn path(&self) -> &PathBuf {
        match self {
            MetricsError::NotFound { path }
            | MetricsError::Io { path, .. }
            | MetricsError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    /// The current run reported zero instructions, so no ratio exists.
    #[error("division by zero: txnum {txnum} reported zero total_instructions")]
    DivisionByZero { txnum: u64 },
}

impl ReportError {
    pub fn is_division_by_zero(&self) -> bool {
        matches!(self, ReportError::DivisionByZero { .. })
    }
}
