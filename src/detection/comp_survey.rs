//! Component-level survey
//!
//! A crew works through a queue of sites probing individual components, as
//! with optical gas imaging. Daily capacity is `survey_speed` components per
//! operating hour; a site larger than one step's capacity is finished on later
//! steps.

use std::collections::{BTreeMap, VecDeque};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::curve::DetectionModel;
use crate::detection::envelope::{OpEnvelope, OpEnvelopeOutcome};
use crate::detection::{
    charge, check_met_variables, condition_rows, pop_front_n, DeploymentRecord, DetectionSink,
    DetectionVariable, DispatchTarget, OperatingHours,
};
use crate::emissions::Emissions;
use crate::field::GasField;
use crate::time::Time;
use crate::LdarError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompSurvey {
    /// Days between survey campaigns; `None` means due every step
    #[serde(default)]
    pub survey_interval: Option<f64>,
    /// Components surveyed per operating hour
    pub survey_speed: f64,
    /// Crew cost per operating hour
    pub labor: f64,
    #[serde(default)]
    pub ophrs: OperatingHours,
    #[serde(default)]
    pub op_envelope: OpEnvelope,
    #[serde(default = "default_variables")]
    pub detection_variables: Vec<DetectionVariable>,
    #[serde(default = "default_model")]
    pub detection: DetectionModel,
    pub dispatch: DispatchTarget,
    #[serde(default)]
    pub site_queue: VecDeque<usize>,
    /// Next component to visit at each site part-way through a survey
    #[serde(default)]
    pub progress: BTreeMap<usize, usize>,
    /// Unused fractional component capacity from earlier steps
    #[serde(default)]
    pub carry: f64,
    #[serde(default)]
    pub record: DeploymentRecord,
}

fn default_variables() -> Vec<DetectionVariable> {
    vec![DetectionVariable::flux()]
}

fn default_model() -> DetectionModel {
    DetectionModel::log_normal(0.02, 0.8)
}

impl CompSurvey {
    pub fn new(dispatch: DispatchTarget) -> Self {
        Self {
            survey_interval: None,
            survey_speed: 150.0,
            labor: 100.0,
            ophrs: OperatingHours::default(),
            op_envelope: OpEnvelope::default(),
            detection_variables: default_variables(),
            detection: default_model(),
            dispatch,
            site_queue: VecDeque::new(),
            progress: BTreeMap::new(),
            carry: 0.0,
            record: DeploymentRecord::default(),
        }
    }

    pub fn with_survey_interval(mut self, interval: Option<f64>) -> Self {
        self.survey_interval = interval;
        self
    }

    pub fn with_survey_speed(mut self, survey_speed: f64, labor: f64) -> Self {
        self.survey_speed = survey_speed;
        self.labor = labor;
        self
    }

    pub fn with_ophrs(mut self, ophrs: OperatingHours) -> Self {
        self.ophrs = ophrs;
        self
    }

    pub fn with_op_envelope(mut self, op_envelope: OpEnvelope) -> Self {
        self.op_envelope = op_envelope;
        self
    }

    pub fn with_detection(
        mut self,
        variables: Vec<DetectionVariable>,
        detection: DetectionModel,
    ) -> Self {
        self.detection_variables = variables;
        self.detection = detection;
        self
    }

    pub fn validate(&self, gas_field: &GasField) -> Result<(), LdarError> {
        if !(self.survey_speed.is_finite() && self.survey_speed > 0.0) {
            return Err(LdarError::InvalidConfig(
                "survey_speed must be finite and > 0".to_string(),
            ));
        }
        if self.survey_interval.is_some_and(|i| !(i.is_finite() && i > 0.0)) {
            return Err(LdarError::InvalidConfig(
                "survey_interval must be finite and > 0".to_string(),
            ));
        }
        self.ophrs.validate()?;
        self.op_envelope.validate(gas_field)?;
        self.detection
            .validate(self.detection_variables.len(), self.flux_column())?;
        check_met_variables(
            self.detection_variables.iter().map(|v| v.name.as_str()),
            gas_field,
        )
    }

    fn flux_column(&self) -> Option<usize> {
        self.detection_variables.iter().position(|v| v.is_flux())
    }

    pub fn check_time(&self, time: &Time) -> bool {
        time.is_due(self.survey_interval)
    }

    pub fn check_op_envelope(
        &self,
        gas_field: &GasField,
        time: &Time,
        site_index: usize,
    ) -> Result<OpEnvelopeOutcome, LdarError> {
        self.op_envelope
            .check(gas_field, time, &self.ophrs, site_index)
    }

    /// Pop up to `n` sites from the front of the queue
    pub fn choose_sites(&mut self, n: usize) -> Vec<usize> {
        pop_front_n(&mut self.site_queue, n)
    }

    /// Condition matrix, one row per emission index and one column per
    /// detection variable
    pub fn get_current_conditions(
        &self,
        time: &Time,
        gas_field: &GasField,
        emissions: &Emissions,
        indices: &[usize],
    ) -> Result<Vec<Vec<f64>>, LdarError> {
        condition_rows(
            &self.detection_variables,
            time,
            gas_field,
            &self.ophrs,
            indices,
            |i| emissions.flux[i],
        )
    }

    /// Survey queued sites within this step's component budget and return the
    /// indices of the active emissions found on the components visited.
    ///
    /// Sites failing the site envelope move to the back of the queue and keep
    /// their progress; a field failure ends the step's survey with nothing
    /// visited.
    pub fn emitters_surveyed(
        &mut self,
        time: &Time,
        gas_field: &GasField,
        emissions: &Emissions,
        find_cost: &mut [f64],
    ) -> Result<Vec<usize>, LdarError> {
        let step = time.time_index;
        if !self.check_time(time) || self.site_queue.is_empty() {
            return Ok(Vec::new());
        }
        if !self
            .op_envelope
            .check_field(gas_field, time, &self.ophrs)?
        {
            debug!(step, "component survey halted by field-wide envelope");
            self.record.op_env_field_fails.add(step, 1.0);
            charge(&mut self.record, find_cost, step, 0.0, 0.0);
            return Ok(Vec::new());
        }

        let capacity = self.carry + self.survey_speed * self.ophrs.hours() * time.delta_t;
        let mut budget = capacity.floor() as usize;
        self.carry = capacity - budget as f64;
        let mut deferred = Vec::new();
        let mut emitters = Vec::new();
        let mut comps_surveyed = 0usize;
        let mut sites_visited = 0usize;
        let mut remaining = self.site_queue.len();

        while budget > 0 && remaining > 0 {
            let Some(&site) = self.site_queue.front() else {
                break;
            };
            remaining -= 1;

            if self.check_op_envelope(gas_field, time, site)? == OpEnvelopeOutcome::SiteFail {
                self.record.op_env_site_fails.add(step, 1.0);
                self.site_queue.pop_front();
                deferred.push(site);
                continue;
            }

            let comp_count = gas_field.sites[site].comp_count;
            let first = self.progress.get(&site).copied().unwrap_or(0);
            let n = budget.min(comp_count.saturating_sub(first));
            let last = first + n;
            emitters.extend(
                emissions
                    .active_at_site(site, time.current_time)
                    .filter(|&i| (first..last).contains(&emissions.comp_index[i])),
            );
            budget -= n;
            comps_surveyed += n;
            sites_visited += 1;

            if last >= comp_count {
                self.site_queue.pop_front();
                self.progress.remove(&site);
            } else {
                self.progress.insert(site, last);
            }
        }
        self.site_queue.extend(deferred);
        if self.site_queue.is_empty() {
            self.carry = 0.0;
        }

        let cost = self.labor * comps_surveyed as f64 / self.survey_speed;
        charge(&mut self.record, find_cost, step, cost, sites_visited as f64);
        Ok(emitters)
    }

    /// Survey, evaluate detection with one Bernoulli draw per surveyed
    /// emission, and return the detected emission indices
    pub fn detect<R: Rng>(
        &mut self,
        time: &Time,
        gas_field: &GasField,
        emissions: &Emissions,
        find_cost: &mut [f64],
        rng: &mut R,
    ) -> Result<Vec<usize>, LdarError> {
        let emitters = self.emitters_surveyed(time, gas_field, emissions, find_cost)?;
        if emitters.is_empty() {
            return Ok(Vec::new());
        }

        let conditions = self.get_current_conditions(time, gas_field, emissions, &emitters)?;
        let flux_column = self.flux_column();
        let detected: Vec<usize> = emitters
            .iter()
            .zip(conditions.iter())
            .filter(|(_, row)| rng.gen_bool(self.detection.probability(row, flux_column)))
            .map(|(&i, _)| i)
            .collect();

        debug!(
            step = time.time_index,
            surveyed = emitters.len(),
            detected = detected.len(),
            "component survey"
        );
        Ok(detected)
    }
}

impl DetectionSink for CompSurvey {
    fn action(&mut self, targets: &[usize]) {
        self.site_queue.extend(targets.iter().copied());
    }
}
