use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, bail};
use glob::glob;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkUnit {
    pub txnum: u64,
}

impl WorkUnit {
    pub fn new(txnum: u64) -> Self {
        Self { txnum }
    }

    /// Parses a `block-<txnum>txs` directory name. Only the canonical
    /// spelling is accepted, so `dir_name` always points back at `name`.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let digits = name.strip_prefix("block-")?.strip_suffix("txs")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let unit = digits.parse().ok().map(Self::new)?;
        (unit.dir_name() == name).then_some(unit)
    }

    pub fn dir_name(&self) -> String {
        format!("block-{}txs", self.txnum)
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.txnum)
    }
}

pub fn discover_units(data_root: &Path) -> Result<Vec<WorkUnit>> {
    if !data_root.is_dir() {
        bail!("Data root is not a directory: {}", data_root.display());
    }

    let root = glob::Pattern::escape(&data_root.to_string_lossy());
    let pattern = format!("{root}/block-*txs");
    let matches =
        glob(&pattern).with_context(|| format!("Invalid discovery pattern: {pattern}"))?;

    let mut units = Vec::new();
    for entry in matches {
        let path = entry?;
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match WorkUnit::from_dir_name(name) {
            Some(unit) => units.push(unit),
            None => debug!(entry = name, "Skipping unparsable block directory"),
        }
    }
    units.sort();
    Ok(units)
}
