//! Whole-site screening
//!
//! Aerial or satellite style surveys flag sites rather than components. The
//! crew processes `sites_per_day` sites; fractional capacity left at the end
//! of a step is carried to the next one while work remains queued.

use std::collections::VecDeque;

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
pub struct SiteSurvey {
    /// Days between survey campaigns; `None` means due every step
    #[serde(default)]
    pub survey_interval: Option<f64>,
    pub sites_per_day: f64,
    /// Cost per surveyed site
    pub site_cost: f64,
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
    /// Unused fractional site capacity from earlier steps
    #[serde(default)]
    pub carry: f64,
    #[serde(default)]
    pub record: DeploymentRecord,
}

fn default_variables() -> Vec<DetectionVariable> {
    vec![DetectionVariable::flux()]
}

fn default_model() -> DetectionModel {
    DetectionModel::log_normal(0.474, 1.36)
}

impl SiteSurvey {
    pub fn new(dispatch: DispatchTarget) -> Self {
        Self {
            survey_interval: None,
            sites_per_day: 200.0,
            site_cost: 100.0,
            ophrs: OperatingHours::default(),
            op_envelope: OpEnvelope::default(),
            detection_variables: default_variables(),
            detection: default_model(),
            dispatch,
            site_queue: VecDeque::new(),
            carry: 0.0,
            record: DeploymentRecord::default(),
        }
    }

    pub fn with_survey_interval(mut self, interval: Option<f64>) -> Self {
        self.survey_interval = interval;
        self
    }

    pub fn with_capacity(mut self, sites_per_day: f64, site_cost: f64) -> Self {
        self.sites_per_day = sites_per_day;
        self.site_cost = site_cost;
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
        if !(self.sites_per_day.is_finite() && self.sites_per_day > 0.0) {
            return Err(LdarError::InvalidConfig(
                "sites_per_day must be finite and > 0".to_string(),
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

    /// Pop up to `n` sites from the front of the queue
    pub fn choose_sites(&mut self, n: usize) -> Vec<usize> {
        pop_front_n(&mut self.site_queue, n)
    }

    /// Survey as many queued sites as this step's capacity allows and return
    /// them. Nothing is surveyed or charged when the stage is not due or the
    /// queue is empty.
    pub fn sites_surveyed(
        &mut self,
        gas_field: &GasField,
        time: &Time,
        find_cost: &mut [f64],
    ) -> Result<Vec<usize>, LdarError> {
        let step = time.time_index;
        if self.site_queue.is_empty() {
            self.carry = 0.0;
            return Ok(Vec::new());
        }
        if !self.check_time(time) {
            return Ok(Vec::new());
        }
        if !self
            .op_envelope
            .check_field(gas_field, time, &self.ophrs)?
        {
            debug!(step, "site survey halted by field-wide envelope");
            self.record.op_env_field_fails.add(step, 1.0);
            charge(&mut self.record, find_cost, step, 0.0, 0.0);
            return Ok(Vec::new());
        }

        let capacity = self.carry + self.sites_per_day * time.delta_t;
        let n = capacity.floor() as usize;
        self.carry = capacity - n as f64;

        let mut surveyed = Vec::with_capacity(n.min(self.site_queue.len()));
        let mut deferred = Vec::new();
        let mut remaining = self.site_queue.len();
        while surveyed.len() < n && remaining > 0 {
            remaining -= 1;
            for site in self.choose_sites(1) {
                match self
                    .op_envelope
                    .check(gas_field, time, &self.ophrs, site)?
                {
                    OpEnvelopeOutcome::SiteFail => {
                        self.record.op_env_site_fails.add(step, 1.0);
                        deferred.push(site);
                    }
                    _ => surveyed.push(site),
                }
            }
        }
        self.site_queue.extend(deferred);
        if self.site_queue.is_empty() {
            self.carry = 0.0;
        }

        let count = surveyed.len() as f64;
        charge(&mut self.record, find_cost, step, self.site_cost * count, count);
        Ok(surveyed)
    }

    /// One Bernoulli draw per site on the total rate of its active emissions
    pub fn detect_prob_curve<R: Rng>(
        &self,
        time: &Time,
        gas_field: &GasField,
        site_ids: &[usize],
        emissions: &Emissions,
        rng: &mut R,
    ) -> Result<Vec<usize>, LdarError> {
        let t = time.current_time;
        let conditions = condition_rows(
            &self.detection_variables,
            time,
            gas_field,
            &self.ophrs,
            site_ids,
            |site| emissions.site_flux(site, t),
        )?;
        let flux_column = self.flux_column();
        Ok(site_ids
            .iter()
            .zip(conditions.iter())
            .filter(|(_, row)| rng.gen_bool(self.detection.probability(row, flux_column)))
            .map(|(&site, _)| site)
            .collect())
    }

    pub fn detect<R: Rng>(
        &mut self,
        time: &Time,
        gas_field: &GasField,
        emissions: &Emissions,
        find_cost: &mut [f64],
        rng: &mut R,
    ) -> Result<Vec<usize>, LdarError> {
        let surveyed = self.sites_surveyed(gas_field, time, find_cost)?;
        if surveyed.is_empty() {
            return Ok(Vec::new());
        }
        let flagged = self.detect_prob_curve(time, gas_field, &surveyed, emissions, rng)?;
        debug!(
            step = time.time_index,
            surveyed = surveyed.len(),
            flagged = flagged.len(),
            "site survey"
        );
        Ok(flagged)
    }
}

impl DetectionSink for SiteSurvey {
    fn action(&mut self, targets: &[usize]) {
        self.site_queue.extend(targets.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::DetectionCurve;
    use crate::emissions::Emission;
    use crate::field::Site;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Six single-component sites; only the even ones leak
    fn field() -> GasField {
        let sites = (0..6).map(|s| Site::new(format!("pad{s}"), 1)).collect();
        let emissions =
            Emissions::from_records((0..6).step_by(2).map(|s| Emission::new(2.0, true, s, 0)))
                .unwrap();
        GasField::new(sites, emissions).unwrap()
    }

    fn threshold() -> DetectionModel {
        // Certain above 1, never at 0
        DetectionModel::Empirical(DetectionCurve::from_1d(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap())
    }

    #[test]
    fn test_empty_queue_leaves_cost_unchanged() {
        let field = field();
        let time = Time::new(1.0, 10.0).unwrap();
        let mut find_cost = vec![0.0; 11];
        let mut tech = SiteSurvey::new(DispatchTarget::technology("ogi"));
        assert!(tech
            .sites_surveyed(&field, &time, &mut find_cost)
            .unwrap()
            .is_empty());
        assert!(find_cost.iter().all(|&c| c == 0.0));
        assert_eq!(tech.record.deployment_cost.total(), 0.0);
        assert!(tech.choose_sites(3).is_empty());
    }

    #[test]
    fn test_not_due_surveys_nothing() {
        let field = field();
        let mut time = Time::new(1.0, 10.0).unwrap();
        time.advance();
        let mut find_cost = vec![0.0; 11];
        let mut tech =
            SiteSurvey::new(DispatchTarget::technology("ogi")).with_survey_interval(Some(30.0));
        tech.action(&field.site_ids());
        assert!(tech
            .sites_surveyed(&field, &time, &mut find_cost)
            .unwrap()
            .is_empty());
        assert_eq!(tech.site_queue.len(), 6);
    }

    #[test]
    fn test_capacity_and_cost() {
        let field = field();
        let mut time = Time::new(0.5, 10.0).unwrap();
        let mut find_cost = vec![0.0; 21];
        // 5 sites per day at half-day steps: 2, then 3 (2.5 + 0.5 carried)
        let mut tech = SiteSurvey::new(DispatchTarget::technology("ogi")).with_capacity(5.0, 40.0);
        tech.action(&field.site_ids());

        let first = tech.sites_surveyed(&field, &time, &mut find_cost).unwrap();
        assert_eq!(first, vec![0, 1]);
        assert_eq!(tech.carry, 0.5);
        time.advance();
        let second = tech.sites_surveyed(&field, &time, &mut find_cost).unwrap();
        assert_eq!(second, vec![2, 3, 4]);
        assert_eq!(find_cost[..2], [80.0, 120.0]);
        assert_eq!(tech.record.deployment_count.values(), &[2.0, 3.0]);
    }

    #[test]
    fn test_detect_flags_leaking_sites() {
        let field = field();
        let time = Time::new(1.0, 10.0).unwrap();
        let mut find_cost = vec![0.0; 11];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut tech = SiteSurvey::new(DispatchTarget::technology("ogi"))
            .with_detection(vec![DetectionVariable::flux()], threshold());
        tech.validate(&field).unwrap();
        tech.action(&field.site_ids());

        let flagged = tech
            .detect(&time, &field, &field.initial_emissions, &mut find_cost, &mut rng)
            .unwrap();
        assert_eq!(flagged, vec![0, 2, 4]);
        assert_eq!(find_cost[0], 600.0);
        assert!(tech.site_queue.is_empty());
    }

    #[test]
    fn test_lognormal_default_prefers_large_leaks() {
        let tech = SiteSurvey::new(DispatchTarget::technology("ogi"));
        let small = tech.detection.probability(&[0.01], Some(0));
        let large = tech.detection.probability(&[100.0], Some(0));
        assert!(small < 0.05);
        assert!(large > 0.95);
        assert_eq!(tech.detection.probability(&[0.0], Some(0)), 0.0);
    }
}
