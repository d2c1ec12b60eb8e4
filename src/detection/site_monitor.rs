//! Continuous site monitoring
//!
//! Fixed sensors watch a set of sites every step. The time-to-detect curve
//! maps a site's current condition row to a mean detection delay in days;
//! each site holds a countdown drawn from an exponential distribution with
//! that mean and is reported whenever the countdown runs out within a step.
//! A reported site immediately starts a fresh countdown, so an emitting site
//! keeps being reported at the curve's mean interval.

use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::Exp1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::curve::DetectionCurve;
use crate::detection::{
    charge, check_met_variables, condition_rows, DeploymentRecord, DetectionSink,
    DetectionVariable, DispatchTarget, OperatingHours,
};
use crate::emissions::Emissions;
use crate::field::GasField;
use crate::time::Time;
use crate::{ensure_len, LdarError};

/// Pending detection at one site
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Countdown {
    /// Mean time to detect the countdown was drawn with [days]
    pub mean: f64,
    /// Days left until the next detection
    pub remaining: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMonitor {
    /// Monitored sites; `None` watches the whole field
    #[serde(default)]
    pub sites: Option<Vec<usize>>,
    /// Mean time to detect [days] over the detection variables
    pub time_to_detect: DetectionCurve,
    #[serde(default = "default_variables")]
    pub detection_variables: Vec<DetectionVariable>,
    #[serde(default)]
    pub ophrs: OperatingHours,
    /// Cost per monitored site per day
    #[serde(default)]
    pub site_cost: f64,
    #[serde(default)]
    pub survey_interval: Option<f64>,
    pub dispatch: DispatchTarget,
    #[serde(default)]
    pub countdowns: BTreeMap<usize, Countdown>,
    #[serde(default)]
    pub record: DeploymentRecord,
}

fn default_variables() -> Vec<DetectionVariable> {
    vec![DetectionVariable::flux()]
}

impl SiteMonitor {
    pub fn new(time_to_detect: DetectionCurve, dispatch: DispatchTarget) -> Self {
        Self {
            sites: None,
            time_to_detect,
            detection_variables: default_variables(),
            ophrs: OperatingHours::default(),
            site_cost: 0.0,
            survey_interval: None,
            dispatch,
            countdowns: BTreeMap::new(),
            record: DeploymentRecord::default(),
        }
    }

    pub fn with_sites(mut self, sites: Vec<usize>) -> Self {
        self.sites = Some(sites);
        self
    }

    pub fn with_site_cost(mut self, site_cost: f64) -> Self {
        self.site_cost = site_cost;
        self
    }

    pub fn with_detection_variables(mut self, variables: Vec<DetectionVariable>) -> Self {
        self.detection_variables = variables;
        self
    }

    pub fn validate(&self, gas_field: &GasField) -> Result<(), LdarError> {
        ensure_len(
            "time-to-detect variables",
            self.time_to_detect.n_variables(),
            self.detection_variables.len(),
        )?;
        if let Some(site) = self
            .sites
            .iter()
            .flatten()
            .find(|&&s| s >= gas_field.n_sites())
        {
            return Err(LdarError::InvalidConfig(format!(
                "monitored site {site} is outside the field"
            )));
        }
        self.ophrs.validate()?;
        check_met_variables(
            self.detection_variables.iter().map(|v| v.name.as_str()),
            gas_field,
        )
    }

    pub fn check_time(&self, time: &Time) -> bool {
        time.is_due(self.survey_interval)
    }

    fn monitored(&self, gas_field: &GasField) -> Vec<usize> {
        match &self.sites {
            Some(sites) => sites.clone(),
            None => gas_field.site_ids(),
        }
    }

    /// Advance every site's countdown by one step and return the sites
    /// whose countdown ran out.
    ///
    /// A countdown is redrawn whenever the mean for its site changes. A zero
    /// mean detects on every step; an infinite mean or a site with no active
    /// emissions is never detected and drops its countdown.
    pub fn detect_prob_curve<R: Rng>(
        &mut self,
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

        let mut detected = Vec::new();
        for (&site, row) in site_ids.iter().zip(conditions.iter()) {
            let mean = self.time_to_detect.evaluate(row);
            if emissions.site_flux(site, t) <= 0.0 || mean.is_nan() || mean == f64::INFINITY {
                self.countdowns.remove(&site);
                continue;
            }

            let mut remaining = match self.countdowns.get(&site) {
                Some(c) if c.mean == mean => c.remaining,
                _ => draw_wait(mean, rng),
            };
            if remaining <= time.delta_t {
                detected.push(site);
                // The next wait starts at the moment of detection
                remaining = if mean > 0.0 {
                    remaining + draw_wait(mean, rng)
                } else {
                    0.0
                };
            }
            self.countdowns.insert(
                site,
                Countdown {
                    mean,
                    remaining: remaining - time.delta_t,
                },
            );
        }
        Ok(detected)
    }

    pub fn detect<R: Rng>(
        &mut self,
        time: &Time,
        gas_field: &GasField,
        emissions: &Emissions,
        find_cost: &mut [f64],
        rng: &mut R,
    ) -> Result<Vec<usize>, LdarError> {
        if !self.check_time(time) {
            return Ok(Vec::new());
        }
        let sites = self.monitored(gas_field);
        let n = sites.len() as f64;
        charge(
            &mut self.record,
            find_cost,
            time.time_index,
            self.site_cost * n * time.delta_t,
            n,
        );

        let detected = self.detect_prob_curve(time, gas_field, &sites, emissions, rng)?;
        if !detected.is_empty() {
            debug!(step = time.time_index, detected = detected.len(), "site monitor");
        }
        Ok(detected)
    }
}

fn draw_wait<R: Rng>(mean: f64, rng: &mut R) -> f64 {
    if mean <= 0.0 {
        0.0
    } else {
        rng.sample::<f64, _>(Exp1) * mean
    }
}

impl DetectionSink for SiteMonitor {
    /// Start monitoring the given sites
    fn action(&mut self, targets: &[usize]) {
        let Some(sites) = self.sites.as_mut() else {
            return;
        };
        for &site in targets {
            if !sites.contains(&site) {
                sites.push(site);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emissions::Emission;
    use crate::field::Site;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn field(n_sites: usize) -> GasField {
        let sites = (0..n_sites).map(|s| Site::new(format!("pad{s}"), 1)).collect();
        let emissions =
            Emissions::from_records((0..n_sites).map(|s| Emission::new(1.0, true, s, 0))).unwrap();
        GasField::new(sites, emissions).unwrap()
    }

    fn constant(mean: f64) -> DetectionCurve {
        DetectionCurve::from_1d(vec![0.0, 10.0], vec![mean, mean]).unwrap()
    }

    #[test]
    fn test_zero_mean_detects_immediately() {
        let field = field(3);
        let time = Time::new(1.0, 10.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut find_cost = vec![0.0; 11];
        let mut tech =
            SiteMonitor::new(constant(0.0), DispatchTarget::repair("rep")).with_site_cost(2.0);
        tech.validate(&field).unwrap();

        let detected = tech
            .detect(&time, &field, &field.initial_emissions, &mut find_cost, &mut rng)
            .unwrap();
        assert_eq!(detected, vec![0, 1, 2]);
        assert_eq!(find_cost[0], 6.0);

        // Still emitting, so reported again on the next step
        let mut time = time;
        time.advance();
        let detected = tech
            .detect(&time, &field, &field.initial_emissions, &mut find_cost, &mut rng)
            .unwrap();
        assert_eq!(detected, vec![0, 1, 2]);
    }

    #[test]
    fn test_infinite_mean_never_detects() {
        let field = field(2);
        let mut time = Time::new(1.0, 100.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut find_cost = vec![0.0; 101];
        let mut tech = SiteMonitor::new(constant(f64::INFINITY), DispatchTarget::repair("rep"));
        for _ in 0..100 {
            let detected = tech
                .detect(&time, &field, &field.initial_emissions, &mut find_cost, &mut rng)
                .unwrap();
            assert!(detected.is_empty());
            time.advance();
        }
        assert!(tech.countdowns.is_empty());
    }

    #[test]
    fn test_mean_time_to_detect() {
        let n_sites = 2000;
        let field = field(n_sites);
        let mut time = Time::new(0.05, 20.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut find_cost = vec![0.0; 401];
        let mut tech = SiteMonitor::new(constant(1.0), DispatchTarget::repair("rep"));

        let mut first = vec![None; n_sites];
        while time.time_index < time.n_timesteps {
            let detected = tech
                .detect(&time, &field, &field.initial_emissions, &mut find_cost, &mut rng)
                .unwrap();
            for site in detected {
                // Detection happens somewhere within this step
                first[site].get_or_insert(time.current_time + time.delta_t);
            }
            time.advance();
        }
        let first: Vec<f64> = first.into_iter().flatten().collect();
        assert_eq!(first.len(), n_sites);
        let mean = first.iter().sum::<f64>() / n_sites as f64;
        assert!((mean - 1.0).abs() < 0.1, "mean time to detect {mean}");
    }

    #[test]
    fn test_emitting_site_is_reported_repeatedly() {
        let n_sites = 200;
        let field = field(n_sites);
        let mut time = Time::new(0.1, 100.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut find_cost = vec![0.0; 1001];
        // Flux sits past the last sample, so the clamped mean stays at one day
        let curve = DetectionCurve::from_1d(vec![0.0, 0.5], vec![f64::INFINITY, 1.0]).unwrap();
        let mut tech = SiteMonitor::new(curve, DispatchTarget::repair("rep"));

        let mut times: Vec<Vec<f64>> = vec![Vec::new(); n_sites];
        for _ in 0..1000 {
            let detected = tech
                .detect(&time, &field, &field.initial_emissions, &mut find_cost, &mut rng)
                .unwrap();
            for site in detected {
                times[site].push(time.current_time);
            }
            time.advance();
        }

        assert!(times.iter().all(|t| t.len() > 50));
        let span: f64 = times.iter().map(|t| t[t.len() - 1] - t[0]).sum();
        let intervals: usize = times.iter().map(|t| t.len() - 1).sum();
        let mean_interval = span / intervals as f64;
        assert!(
            (mean_interval - 1.0).abs() < 0.05,
            "mean interval between detections {mean_interval}"
        );
    }

    #[test]
    fn test_repaired_site_drops_countdown() {
        let field = field(1);
        let time = Time::new(1.0, 10.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut tech = SiteMonitor::new(constant(50.0), DispatchTarget::repair("rep"));
        let mut emissions = field.initial_emissions.clone();
        tech.detect_prob_curve(&time, &field, &[0], &emissions, &mut rng)
            .unwrap();
        assert!(tech.countdowns.contains_key(&0));

        emissions.flux[0] = 0.0;
        tech.detect_prob_curve(&time, &field, &[0], &emissions, &mut rng)
            .unwrap();
        assert!(tech.countdowns.is_empty());
    }

    #[test]
    fn test_action_extends_explicit_site_list() {
        let mut tech = SiteMonitor::new(constant(1.0), DispatchTarget::repair("rep")).with_sites(vec![1]);
        tech.action(&[1, 3]);
        assert_eq!(tech.sites, Some(vec![1, 3]));

        let mut all = SiteMonitor::new(constant(1.0), DispatchTarget::repair("rep"));
        all.action(&[2]);
        assert_eq!(all.sites, None);
    }
}
