//! Detection stages
//!
//! A technology queues candidate sites, gates them on its operating envelope,
//! evaluates detection and forwards what it found to a downstream sink: another
//! technology or a repair stage.

pub mod comp_survey;
pub mod envelope;
pub mod site_monitor;
pub mod site_survey;

use std::collections::VecDeque;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::emissions::Emissions;
use crate::field::GasField;
use crate::time::Time;
use crate::LdarError;

use comp_survey::CompSurvey;
use site_monitor::SiteMonitor;
use site_survey::SiteSurvey;

/// Anything a detection stage can forward targets to
pub trait DetectionSink {
    /// Accept targets for later processing. Repeated calls extend the pending
    /// set rather than replacing it.
    fn action(&mut self, targets: &[usize]);
}

/// Where a technology forwards its detections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTarget {
    Technology(String),
    Repair(String),
}

impl DispatchTarget {
    pub fn technology(name: impl Into<String>) -> Self {
        Self::Technology(name.into())
    }

    pub fn repair(name: impl Into<String>) -> Self {
        Self::Repair(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Technology(name) | Self::Repair(name) => name,
        }
    }
}

/// Detection result of one stage for one step
#[derive(Debug, Clone, PartialEq)]
pub enum Detected {
    /// Site identifiers flagged by a site-level stage
    Sites(Vec<usize>),
    /// Emission indices flagged by a component-level stage
    Emissions(Vec<usize>),
}

impl Detected {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Sites(ids) | Self::Emissions(ids) => ids.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Sites(ids) | Self::Emissions(ids) => ids.len(),
        }
    }

    /// Site identifiers, collapsing emissions onto their sites in first-seen order
    pub fn into_sites(self, emissions: &Emissions) -> Vec<usize> {
        match self {
            Self::Sites(ids) => ids,
            Self::Emissions(ids) => {
                let mut sites = Vec::new();
                for i in ids {
                    let site = emissions.site_index[i];
                    if !sites.contains(&site) {
                        sites.push(site);
                    }
                }
                sites
            }
        }
    }

    /// Emission indices, expanding sites into the emissions active there
    pub fn into_emissions(self, emissions: &Emissions, t: f64) -> Vec<usize> {
        match self {
            Self::Emissions(ids) => ids,
            Self::Sites(ids) => ids
                .into_iter()
                .flat_map(|site| emissions.active_at_site(site, t).collect::<Vec<_>>())
                .collect(),
        }
    }
}

/// Per-step accumulator. Index `i` holds the total recorded during step `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepSeries(Vec<f64>);

impl StepSeries {
    pub fn add(&mut self, step: usize, value: f64) {
        if self.0.len() <= step {
            self.0.resize(step + 1, 0.0);
        }
        self.0[step] += value;
    }

    pub fn get(&self, step: usize) -> f64 {
        self.0.get(step).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

/// Deployment counters kept by every technology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    #[serde(rename = "deployment costs")]
    pub deployment_cost: StepSeries,
    #[serde(rename = "deployment count")]
    pub deployment_count: StepSeries,
    #[serde(rename = "op env site fails")]
    pub op_env_site_fails: StepSeries,
    #[serde(rename = "op env field fails")]
    pub op_env_field_fails: StepSeries,
}

/// Daily working window [hours since midnight]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub begin: f64,
    pub end: f64,
}

impl OperatingHours {
    pub fn new(begin: f64, end: f64) -> Self {
        Self { begin, end }
    }

    pub fn hours(&self) -> f64 {
        (self.end - self.begin).max(0.0)
    }

    pub fn validate(&self) -> Result<(), LdarError> {
        if !(0.0..=24.0).contains(&self.begin) || !(0.0..=24.0).contains(&self.end) {
            return Err(LdarError::InvalidConfig(
                "operating hours must lie within [0, 24]".to_string(),
            ));
        }
        if self.end < self.begin {
            return Err(LdarError::InvalidConfig(
                "operating hours end before they begin".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self::new(8.0, 17.0)
    }
}

/// How an hourly series is reduced over the operating window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Mean,
    Min,
    Max,
}

impl Aggregation {
    pub fn apply<I: IntoIterator<Item = f64>>(self, values: I) -> f64 {
        let mut count = 0usize;
        let mut acc = match self {
            Aggregation::Mean => 0.0,
            Aggregation::Min => f64::INFINITY,
            Aggregation::Max => f64::NEG_INFINITY,
        };
        for v in values {
            count += 1;
            acc = match self {
                Aggregation::Mean => acc + v,
                Aggregation::Min => acc.min(v),
                Aggregation::Max => acc.max(v),
            };
        }
        match (self, count) {
            (_, 0) => f64::NAN,
            (Aggregation::Mean, n) => acc / n as f64,
            _ => acc,
        }
    }
}

/// One column of the condition matrix fed to a detection curve.
///
/// `flux` is read from the emission ledger; any other name is looked up in
/// the field's meteorological data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionVariable {
    pub name: String,
    #[serde(default)]
    pub aggregation: Aggregation,
}

impl DetectionVariable {
    pub const FLUX: &'static str = "flux";

    pub fn new(name: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            name: name.into(),
            aggregation,
        }
    }

    pub fn flux() -> Self {
        Self::new(Self::FLUX, Aggregation::Mean)
    }

    pub fn is_flux(&self) -> bool {
        self.name == Self::FLUX
    }
}

/// Build one condition row per target.
///
/// `flux_of` supplies the emission-intrinsic value of each target (the leak
/// rate for component surveys, the summed site rate for site-level stages).
/// Meteorological columns are identical across rows, so they are aggregated
/// once.
pub(crate) fn condition_rows<F>(
    variables: &[DetectionVariable],
    time: &Time,
    gas_field: &GasField,
    ophrs: &OperatingHours,
    targets: &[usize],
    flux_of: F,
) -> Result<Vec<Vec<f64>>, LdarError>
where
    F: Fn(usize) -> f64,
{
    let mut met_values = Vec::with_capacity(variables.len());
    for var in variables {
        if var.is_flux() {
            met_values.push(None);
        } else {
            let value = gas_field
                .met
                .aggregate(&var.name, time, ophrs, var.aggregation)?;
            met_values.push(Some(value));
        }
    }

    Ok(targets
        .iter()
        .map(|&target| {
            met_values
                .iter()
                .map(|v| v.unwrap_or_else(|| flux_of(target)))
                .collect()
        })
        .collect())
}

/// Check that every non-flux variable is available in the field's met data
pub(crate) fn check_met_variables<'a, I>(names: I, gas_field: &GasField) -> Result<(), LdarError>
where
    I: IntoIterator<Item = &'a str>,
{
    for name in names {
        if name != DetectionVariable::FLUX && !gas_field.met.contains(name) {
            return Err(LdarError::MissingMetVariable(name.to_string()));
        }
    }
    Ok(())
}

/// Pop up to `n` entries from the front of a queue
pub(crate) fn pop_front_n(queue: &mut VecDeque<usize>, n: usize) -> Vec<usize> {
    let n = n.min(queue.len());
    queue.drain(..n).collect()
}

/// A configured detection stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technology {
    CompSurvey(CompSurvey),
    SiteSurvey(SiteSurvey),
    SiteMonitor(SiteMonitor),
}

impl Technology {
    pub fn kind(&self) -> &'static str {
        match self {
            Technology::CompSurvey(_) => "comp_survey",
            Technology::SiteSurvey(_) => "site_survey",
            Technology::SiteMonitor(_) => "site_monitor",
        }
    }

    pub fn dispatch(&self) -> &DispatchTarget {
        match self {
            Technology::CompSurvey(t) => &t.dispatch,
            Technology::SiteSurvey(t) => &t.dispatch,
            Technology::SiteMonitor(t) => &t.dispatch,
        }
    }

    pub fn survey_interval(&self) -> Option<f64> {
        match self {
            Technology::CompSurvey(t) => t.survey_interval,
            Technology::SiteSurvey(t) => t.survey_interval,
            Technology::SiteMonitor(t) => t.survey_interval,
        }
    }

    pub fn record(&self) -> &DeploymentRecord {
        match self {
            Technology::CompSurvey(t) => &t.record,
            Technology::SiteSurvey(t) => &t.record,
            Technology::SiteMonitor(t) => &t.record,
        }
    }

    /// True for stages that work through a site queue refilled on each
    /// survey interval
    pub fn is_queued(&self) -> bool {
        !matches!(self, Technology::SiteMonitor(_))
    }

    pub fn check_time(&self, time: &Time) -> bool {
        time.is_due(self.survey_interval())
    }

    pub fn validate(&self, gas_field: &GasField) -> Result<(), LdarError> {
        match self {
            Technology::CompSurvey(t) => t.validate(gas_field),
            Technology::SiteSurvey(t) => t.validate(gas_field),
            Technology::SiteMonitor(t) => t.validate(gas_field),
        }
    }

    pub fn detect<R: Rng>(
        &mut self,
        time: &Time,
        gas_field: &GasField,
        emissions: &Emissions,
        find_cost: &mut [f64],
        rng: &mut R,
    ) -> Result<Detected, LdarError> {
        match self {
            Technology::CompSurvey(t) => t
                .detect(time, gas_field, emissions, find_cost, rng)
                .map(Detected::Emissions),
            Technology::SiteSurvey(t) => t
                .detect(time, gas_field, emissions, find_cost, rng)
                .map(Detected::Sites),
            Technology::SiteMonitor(t) => t
                .detect(time, gas_field, emissions, find_cost, rng)
                .map(Detected::Sites),
        }
    }
}

impl DetectionSink for Technology {
    fn action(&mut self, targets: &[usize]) {
        match self {
            Technology::CompSurvey(t) => t.action(targets),
            Technology::SiteSurvey(t) => t.action(targets),
            Technology::SiteMonitor(t) => t.action(targets),
        }
    }
}

impl From<CompSurvey> for Technology {
    fn from(t: CompSurvey) -> Self {
        Technology::CompSurvey(t)
    }
}

impl From<SiteSurvey> for Technology {
    fn from(t: SiteSurvey) -> Self {
        Technology::SiteSurvey(t)
    }
}

impl From<SiteMonitor> for Technology {
    fn from(t: SiteMonitor) -> Self {
        Technology::SiteMonitor(t)
    }
}

/// Charge a survey cost to both the program's find-cost array and the
/// technology's own deployment record
pub(crate) fn charge(
    record: &mut DeploymentRecord,
    find_cost: &mut [f64],
    time_index: usize,
    cost: f64,
    count: f64,
) {
    if let Some(slot) = find_cost.get_mut(time_index) {
        *slot += cost;
    }
    record.deployment_cost.add(time_index, cost);
    record.deployment_count.add(time_index, count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emissions::Emission;

    #[test]
    fn test_step_series_grows_on_demand() {
        let mut s = StepSeries::default();
        s.add(3, 2.0);
        s.add(3, 1.0);
        s.add(0, 1.0);
        assert_eq!(s.values(), &[1.0, 0.0, 0.0, 3.0]);
        assert_eq!(s.get(10), 0.0);
        assert_eq!(s.total(), 4.0);
    }

    #[test]
    fn test_aggregation() {
        let v = [1.0, 4.0, 2.0];
        assert_eq!(Aggregation::Mean.apply(v), 7.0 / 3.0);
        assert_eq!(Aggregation::Min.apply(v), 1.0);
        assert_eq!(Aggregation::Max.apply(v), 4.0);
        assert!(Aggregation::Mean.apply(std::iter::empty()).is_nan());
    }

    #[test]
    fn test_detected_conversions() {
        let emissions = Emissions::from_records([
            Emission::new(1.0, true, 0, 0),
            Emission::new(1.0, true, 1, 0),
            Emission::new(1.0, true, 1, 1),
            Emission::new(0.0, true, 1, 2),
        ])
        .unwrap();

        let sites = Detected::Emissions(vec![2, 0, 1]).into_sites(&emissions);
        assert_eq!(sites, vec![1, 0]);

        let inds = Detected::Sites(vec![1]).into_emissions(&emissions, 0.0);
        assert_eq!(inds, vec![1, 2]);
    }

    #[test]
    fn test_pop_front_n() {
        let mut q: VecDeque<usize> = (0..5).collect();
        assert_eq!(pop_front_n(&mut q, 2), vec![0, 1]);
        assert_eq!(pop_front_n(&mut q, 10), vec![2, 3, 4]);
        assert!(pop_front_n(&mut q, 3).is_empty());
    }

    #[test]
    fn test_operating_hours_validation() {
        assert!(OperatingHours::default().validate().is_ok());
        assert_eq!(OperatingHours::default().hours(), 9.0);
        assert!(OperatingHours::new(17.0, 8.0).validate().is_err());
        assert!(OperatingHours::new(-1.0, 8.0).validate().is_err());
    }
}
