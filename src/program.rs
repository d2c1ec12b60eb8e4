//! LDAR program orchestration
//!
//! A program owns a private copy of the emission ledger, its detection stages
//! and the repair stages they feed. Each step runs every stage in insertion
//! order, routes detections to their sinks, applies repairs and retires ended
//! emissions.

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::{Detected, DetectionSink, DispatchTarget, Technology};
use crate::emissions::Emissions;
use crate::field::GasField;
use crate::repair::Repair;
use crate::time::Time;
use crate::LdarError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdarProgram {
    pub emissions: Emissions,
    pub technologies: IndexMap<String, Technology>,
    pub repairs: IndexMap<String, Repair>,
    /// Mean emission rate of each simulated step
    pub emissions_timeseries: Vec<f64>,
    /// Mean rate of non-reparable emissions of each simulated step
    pub vents_timeseries: Vec<f64>,
    /// Detection spending per step, `n_timesteps + 1` entries
    pub find_cost: Vec<f64>,
}

impl LdarProgram {
    pub fn new(
        gas_field: &GasField,
        time: &Time,
        technologies: IndexMap<String, Technology>,
        repairs: IndexMap<String, Repair>,
    ) -> Result<Self, LdarError> {
        let program = Self {
            emissions: gas_field.initial_emissions.clone(),
            technologies,
            repairs,
            emissions_timeseries: Vec::with_capacity(time.n_timesteps),
            vents_timeseries: Vec::with_capacity(time.n_timesteps),
            find_cost: vec![0.0; time.n_timesteps + 1],
        };
        program.validate(gas_field)?;
        Ok(program)
    }

    /// Baseline program with no detection
    pub fn null(gas_field: &GasField, time: &Time) -> Self {
        Self {
            emissions: gas_field.initial_emissions.clone(),
            technologies: IndexMap::new(),
            repairs: IndexMap::new(),
            emissions_timeseries: Vec::with_capacity(time.n_timesteps),
            vents_timeseries: Vec::with_capacity(time.n_timesteps),
            find_cost: vec![0.0; time.n_timesteps + 1],
        }
    }

    pub fn validate(&self, gas_field: &GasField) -> Result<(), LdarError> {
        for (name, tech) in &self.technologies {
            tech.validate(gas_field)?;
            let target = tech.dispatch();
            let exists = match target {
                DispatchTarget::Technology(t) => {
                    if t == name {
                        return Err(LdarError::InvalidConfig(format!(
                            "technology '{name}' dispatches to itself"
                        )));
                    }
                    self.technologies.contains_key(t)
                }
                DispatchTarget::Repair(r) => self.repairs.contains_key(r),
            };
            if !exists {
                return Err(LdarError::UnknownTarget(target.name().to_string()));
            }
        }
        for (name, rep) in &self.repairs {
            if !(rep.repair_delay.is_finite() && rep.repair_delay >= 0.0) {
                return Err(LdarError::InvalidConfig(format!(
                    "repair '{name}' needs a finite repair_delay >= 0"
                )));
            }
        }
        Ok(())
    }

    /// Run one step of detection and repair
    pub fn action<R: Rng>(
        &mut self,
        time: &Time,
        gas_field: &GasField,
        rng: &mut R,
    ) -> Result<(), LdarError> {
        let site_ids = gas_field.site_ids();
        for tech in self.technologies.values_mut() {
            if tech.is_queued() && tech.survey_interval().is_some() && tech.check_time(time) {
                tech.action(&site_ids);
            }
        }

        for k in 0..self.technologies.len() {
            let Some((name, tech)) = self.technologies.get_index_mut(k) else {
                continue;
            };
            let detected = tech.detect(time, gas_field, &self.emissions, &mut self.find_cost, rng)?;
            if detected.is_empty() {
                continue;
            }
            debug!(step = time.time_index, stage = %name, found = detected.len(), "detected");
            let target = tech.dispatch().clone();
            self.route(&target, detected, time)?;
        }

        for rep in self.repairs.values_mut() {
            rep.repair(time, &mut self.emissions);
        }
        self.end_emissions(time);
        Ok(())
    }

    fn route(
        &mut self,
        target: &DispatchTarget,
        detected: Detected,
        time: &Time,
    ) -> Result<(), LdarError> {
        match target {
            DispatchTarget::Technology(name) => {
                let sink = self
                    .technologies
                    .get_mut(name)
                    .ok_or_else(|| LdarError::UnknownTarget(name.clone()))?;
                sink.action(&detected.into_sites(&self.emissions));
            }
            DispatchTarget::Repair(name) => {
                let sink = self
                    .repairs
                    .get_mut(name)
                    .ok_or_else(|| LdarError::UnknownTarget(name.clone()))?;
                sink.action(&detected.into_emissions(&self.emissions, time.current_time));
            }
        }
        Ok(())
    }

    /// Zero the flux of every emission that has ended by the current time
    pub fn end_emissions(&mut self, time: &Time) -> usize {
        self.emissions.end_emissions(time.current_time)
    }

    /// Append this step's mean emission and vent rates
    pub fn record_rates(&mut self, time: &Time) {
        let (t0, t1) = time.step_window();
        self.emissions_timeseries
            .push(self.emissions.em_rate_in_range(t0, t1, None));
        self.vents_timeseries
            .push(self.emissions.em_rate_in_range(t0, t1, Some(false)));
    }

    /// Total emitted volume over the recorded steps
    pub fn cumulative_emissions(&self, delta_t: f64) -> f64 {
        self.emissions_timeseries.iter().sum::<f64>() * delta_t
    }

    pub fn total_find_cost(&self) -> f64 {
        self.find_cost.iter().sum()
    }

    pub fn total_repair_cost(&self) -> f64 {
        self.repairs.values().map(|r| r.repair_cost.total()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{DetectionCurve, DetectionModel};
    use crate::detection::comp_survey::CompSurvey;
    use crate::detection::site_survey::SiteSurvey;
    use crate::detection::DetectionVariable;
    use crate::emissions::Emission;
    use crate::field::Site;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn field() -> GasField {
        let sites = (0..4).map(|s| Site::new(format!("pad{s}"), 5)).collect();
        let emissions = Emissions::from_records(
            [
                Emission::new(1.0, true, 0, 2),
                Emission::new(1.0, true, 2, 4),
                Emission::new(0.5, false, 3, 0),
            ]
            .map(|e| Emission {
                repair_cost: 25.0,
                ..e
            }),
        )
        .unwrap();
        GasField::new(sites, emissions).unwrap()
    }

    fn certain() -> DetectionModel {
        DetectionModel::Empirical(DetectionCurve::from_1d(vec![0.0, 0.1], vec![0.0, 1.0]).unwrap())
    }

    fn tiered(field: &GasField, time: &Time) -> LdarProgram {
        let mut technologies = IndexMap::new();
        technologies.insert(
            "aerial".to_string(),
            SiteSurvey::new(DispatchTarget::technology("ogi_fu"))
                .with_survey_interval(Some(30.0))
                .with_detection(vec![DetectionVariable::flux()], certain())
                .into(),
        );
        technologies.insert(
            "ogi_fu".to_string(),
            CompSurvey::new(DispatchTarget::repair("crew"))
                .with_detection(vec![DetectionVariable::flux()], certain())
                .into(),
        );
        let mut repairs = IndexMap::new();
        repairs.insert("crew".to_string(), Repair::new(0.0));
        LdarProgram::new(field, time, technologies, repairs).unwrap()
    }

    #[test]
    fn test_tiered_detects_and_repairs_in_one_step() {
        let field = field();
        let time = Time::new(1.0, 5.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut program = tiered(&field, &time);

        program.action(&time, &field, &mut rng).unwrap();
        program.record_rates(&time);

        // Both leaks repaired at t = 0; the vent keeps emitting
        assert_eq!(program.emissions.flux, vec![0.0, 0.0, 0.5]);
        assert_eq!(program.emissions_timeseries, vec![0.5]);
        assert_eq!(program.vents_timeseries, vec![0.5]);
        assert_eq!(program.repairs["crew"].repair_count.total(), 2.0);
        assert_eq!(program.total_repair_cost(), 50.0);
        // Four screened sites at 100 each plus 15 components of follow-up
        let ogi = 100.0 * 15.0 / 150.0;
        assert!((program.total_find_cost() - (400.0 + ogi)).abs() < 1e-9);
    }

    #[test]
    fn test_null_program_never_repairs() {
        let field = field();
        let mut time = Time::new(1.0, 5.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut program = LdarProgram::null(&field, &time);
        for _ in 0..time.n_timesteps {
            program.action(&time, &field, &mut rng).unwrap();
            program.record_rates(&time);
            time.advance();
        }
        assert_eq!(program.emissions_timeseries, vec![2.5; 5]);
        assert_eq!(program.cumulative_emissions(time.delta_t), 12.5);
        assert_eq!(program.find_cost.len(), 6);
    }

    #[test]
    fn test_programs_do_not_share_ledgers() {
        let field = field();
        let time = Time::new(1.0, 5.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut tiered = tiered(&field, &time);
        let null = LdarProgram::null(&field, &time);
        tiered.action(&time, &field, &mut rng).unwrap();
        assert_eq!(null.emissions, field.initial_emissions);
        assert_ne!(tiered.emissions, field.initial_emissions);
    }

    #[test]
    fn test_unknown_dispatch_target_is_rejected() {
        let field = field();
        let time = Time::new(1.0, 5.0).unwrap();
        let mut technologies = IndexMap::new();
        technologies.insert(
            "ogi".to_string(),
            CompSurvey::new(DispatchTarget::repair("nobody")).into(),
        );
        let result = LdarProgram::new(&field, &time, technologies, IndexMap::new());
        assert!(matches!(result, Err(LdarError::UnknownTarget(name)) if name == "nobody"));

        let mut technologies = IndexMap::new();
        technologies.insert(
            "loop".to_string(),
            CompSurvey::new(DispatchTarget::technology("loop")).into(),
        );
        let result = LdarProgram::new(&field, &time, technologies, IndexMap::new());
        assert!(matches!(result, Err(LdarError::InvalidConfig(_))));
    }
}
