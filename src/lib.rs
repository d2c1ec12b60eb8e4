//! LDAR simulation engine
//!
//! Simulates fugitive-gas emissions at oil and gas sites over a fixed-step
//! horizon and evaluates how leak detection and repair (LDAR) programs built
//! from chained detection technologies reduce cumulative emissions relative to
//! a do-nothing baseline.

pub mod curve;
pub mod detection;
pub mod emissions;
pub mod field;
pub mod program;
pub mod repair;
pub mod scenario;
pub mod time;

use std::path::PathBuf;

use thiserror::Error;

// Re-export main types
pub use curve::{DetectionCurve, DetectionModel};
pub use detection::comp_survey::CompSurvey;
pub use detection::envelope::{OpEnvelope, OpEnvelopeOutcome, OpRequirement};
pub use detection::site_monitor::SiteMonitor;
pub use detection::site_survey::SiteSurvey;
pub use detection::{
    Aggregation, Detected, DetectionSink, DetectionVariable, DispatchTarget, OperatingHours,
    StepSeries, Technology,
};
pub use emissions::{Emission, Emissions};
pub use field::{GasField, MetData, Site};
pub use program::LdarProgram;
pub use repair::Repair;
pub use scenario::{ProgramResults, SaveMethod, Scenario, StageResults};
pub use time::Time;

#[derive(Debug, Error)]
pub enum LdarError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] bitcode::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{context} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("unknown dispatch target '{0}'")]
    UnknownTarget(String),
    #[error("meteorological variable '{0}' is not loaded")]
    MissingMetVariable(String),
    #[error("save method '{method}' does not exist; results were saved to {}", written.display())]
    UnknownSaveMethod { method: String, written: PathBuf },
}

pub(crate) fn ensure_len(
    context: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), LdarError> {
    if expected == actual {
        return Ok(());
    }

    Err(LdarError::LengthMismatch {
        context,
        expected,
        got: actual,
    })
}
