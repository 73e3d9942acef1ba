use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::metrics::read_dir;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub block_height: u64,
    pub left_instructions: u64,
    pub right_instructions: u64,
    /// `(right - left) / right * 100`; `None` when the right-hand count is
    /// zero.
    pub percent_less: Option<f64>,
}

impl ComparisonRow {
    pub fn render(&self, left_label: &str, right_label: &str) -> String {
        match self.percent_less {
            Some(pct) => format!(
                "Block Height: {}, Instructions Difference: {pct:.2}% less in {left_label}",
                self.block_height
            ),
            None => format!(
                "Block Height: {}, Instructions Difference: Division by zero ({right_label} has 0 instructions)",
                self.block_height
            ),
        }
    }
}

/// Pairs the records of two metrics directories by block height. Heights
/// present on only one side are ignored.
pub fn compare_dirs(left: &Path, right: &Path) -> Result<Vec<ComparisonRow>> {
    let left = instructions_by_height(left)?;
    let right = instructions_by_height(right)?;

    Ok(left
        .iter()
        .filter_map(|(height, &left_instructions)| {
            let &right_instructions = right.get(height)?;
            let percent_less = (right_instructions != 0).then(|| {
                (right_instructions as f64 - left_instructions as f64)
                    / right_instructions as f64
                    * 100.0
            });
            Some(ComparisonRow {
                block_height: *height,
                left_instructions,
                right_instructions,
                percent_less,
            })
        })
        .collect())
}

fn instructions_by_height(dir: &Path) -> Result<BTreeMap<u64, u64>> {
    let records = read_dir(dir)
        .with_context(|| format!("Failed to load metrics directory: {}", dir.display()))?;
    Ok(records
        .into_iter()
        .map(|loaded| (loaded.record.block_height, loaded.record.total_instructions))
        .collect())
}
