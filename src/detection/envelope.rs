//! Operational envelope gating
//!
//! Field-wide requirements (class 1) are checked before site requirements
//! (class 2). A field-wide violation stops the whole survey for the step; a
//! site violation only skips that site.

use serde::{Deserialize, Serialize};

use crate::detection::{Aggregation, OperatingHours};
use crate::field::GasField;
use crate::time::Time;
use crate::{ensure_len, LdarError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpEnvelopeOutcome {
    SitePass,
    SiteFail,
    FieldFail,
}

/// One operating constraint on a meteorological variable.
///
/// Each `(min[k], max[k])` pair is an allowed interval; the value passes when
/// it lies in any of them, bounds inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpRequirement {
    /// Class 1: one set of intervals for the whole field
    Field {
        variable: String,
        min: Vec<f64>,
        max: Vec<f64>,
        #[serde(default)]
        aggregation: Aggregation,
    },
    /// Class 2: one set of intervals per site
    Site {
        variable: String,
        min: Vec<Vec<f64>>,
        max: Vec<Vec<f64>>,
        #[serde(default)]
        aggregation: Aggregation,
    },
}

impl OpRequirement {
    pub fn field(variable: impl Into<String>, min: Vec<f64>, max: Vec<f64>) -> Self {
        Self::Field {
            variable: variable.into(),
            min,
            max,
            aggregation: Aggregation::Mean,
        }
    }

    pub fn site(variable: impl Into<String>, min: Vec<Vec<f64>>, max: Vec<Vec<f64>>) -> Self {
        Self::Site {
            variable: variable.into(),
            min,
            max,
            aggregation: Aggregation::Mean,
        }
    }

    pub fn variable(&self) -> &str {
        match self {
            Self::Field { variable, .. } | Self::Site { variable, .. } => variable,
        }
    }

    fn validate(&self, n_sites: usize) -> Result<(), LdarError> {
        match self {
            Self::Field { min, max, .. } => check_intervals(min, max),
            Self::Site { min, max, .. } => {
                ensure_len("site envelope min", n_sites, min.len())?;
                ensure_len("site envelope max", n_sites, max.len())?;
                min.iter()
                    .zip(max.iter())
                    .try_for_each(|(lo, hi)| check_intervals(lo, hi))
            }
        }
    }
}

fn check_intervals(min: &[f64], max: &[f64]) -> Result<(), LdarError> {
    ensure_len("envelope interval bounds", min.len(), max.len())?;
    if min.is_empty() {
        return Err(LdarError::InvalidConfig(
            "envelope requirement has no allowed interval".to_string(),
        ));
    }
    if min.iter().zip(max.iter()).any(|(lo, hi)| lo.is_nan() || hi.is_nan() || lo > hi) {
        return Err(LdarError::InvalidConfig(
            "envelope interval bounds must satisfy min <= max".to_string(),
        ));
    }
    Ok(())
}

fn within_any(value: f64, min: &[f64], max: &[f64]) -> bool {
    min.iter()
        .zip(max.iter())
        .any(|(&lo, &hi)| lo <= value && value <= hi)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpEnvelope {
    pub requirements: Vec<OpRequirement>,
}

impl OpEnvelope {
    pub fn new(requirements: Vec<OpRequirement>) -> Self {
        Self { requirements }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Check array shapes against the field and that every variable is loaded
    pub fn validate(&self, gas_field: &GasField) -> Result<(), LdarError> {
        for req in &self.requirements {
            req.validate(gas_field.n_sites())?;
            if !gas_field.met.contains(req.variable()) {
                return Err(LdarError::MissingMetVariable(req.variable().to_string()));
            }
        }
        Ok(())
    }

    /// Class-1 requirements only
    pub fn check_field(
        &self,
        gas_field: &GasField,
        time: &Time,
        ophrs: &OperatingHours,
    ) -> Result<bool, LdarError> {
        for req in &self.requirements {
            if let OpRequirement::Field {
                variable,
                min,
                max,
                aggregation,
            } = req
            {
                let value = gas_field.met.aggregate(variable, time, ophrs, *aggregation)?;
                if !within_any(value, min, max) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    pub fn check(
        &self,
        gas_field: &GasField,
        time: &Time,
        ophrs: &OperatingHours,
        site_index: usize,
    ) -> Result<OpEnvelopeOutcome, LdarError> {
        if !self.check_field(gas_field, time, ophrs)? {
            return Ok(OpEnvelopeOutcome::FieldFail);
        }

        for req in &self.requirements {
            if let OpRequirement::Site {
                variable,
                min,
                max,
                aggregation,
            } = req
            {
                let (Some(lo), Some(hi)) = (min.get(site_index), max.get(site_index)) else {
                    return Err(LdarError::InvalidConfig(format!(
                        "no '{variable}' envelope for site {site_index}"
                    )));
                };
                let value = gas_field.met.aggregate(variable, time, ophrs, *aggregation)?;
                if !within_any(value, lo, hi) {
                    return Ok(OpEnvelopeOutcome::SiteFail);
                }
            }
        }
        Ok(OpEnvelopeOutcome::SitePass)
    }
}
