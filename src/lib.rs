pub mod compare;
pub mod config;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod scheduler;
pub mod stages;
pub mod unit;
pub mod validation;

pub use config::{HarnessConfig, RunMode};
pub use harness::{HarnessOptions, HarnessReport, run_harness};
pub use pipeline::{UnitOutcome, UnitPipeline};
pub use process::{StageBackend, StageOutcome, SystemBackend};
