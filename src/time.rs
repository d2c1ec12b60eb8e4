//! Fixed-step simulation clock
//!
//! Time units are days throughout the crate.

use serde::{Deserialize, Serialize};

use crate::LdarError;

/// Clock shared by every component of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Time {
    /// Length of one step [days]
    pub delta_t: f64,
    /// Simulation horizon [days]
    pub end_time: f64,
    /// Number of whole steps in the horizon
    pub n_timesteps: usize,
    /// Time at the start of the current step [days]
    pub current_time: f64,
    /// Index of the current step
    pub time_index: usize,
    start_time: f64,
}

impl Time {
    /// Create a clock starting at time zero
    pub fn new(delta_t: f64, end_time: f64) -> Result<Self, LdarError> {
        Self::starting_at(delta_t, end_time, 0.0)
    }

    /// Create a clock whose first step begins at `current_time`
    pub fn starting_at(delta_t: f64, end_time: f64, current_time: f64) -> Result<Self, LdarError> {
        if !(delta_t.is_finite() && delta_t > 0.0) {
            return Err(LdarError::InvalidConfig(
                "delta_t must be finite and > 0".to_string(),
            ));
        }
        if !(end_time.is_finite() && end_time >= 0.0) {
            return Err(LdarError::InvalidConfig(
                "end_time must be finite and >= 0".to_string(),
            ));
        }
        if !current_time.is_finite() {
            return Err(LdarError::InvalidConfig(
                "current_time must be finite".to_string(),
            ));
        }

        Ok(Self {
            delta_t,
            end_time,
            n_timesteps: (end_time / delta_t).floor() as usize,
            current_time,
            time_index: 0,
            start_time: current_time,
        })
    }

    /// True when a stage with the given survey interval is due this step.
    ///
    /// `None` means the stage runs every step.
    pub fn is_due(&self, survey_interval: Option<f64>) -> bool {
        match survey_interval {
            None => true,
            Some(interval) => self.current_time.rem_euclid(interval) < self.delta_t,
        }
    }

    /// Bounds of the current step
    pub fn step_window(&self) -> (f64, f64) {
        (self.current_time, self.current_time + self.delta_t)
    }

    /// Move to the next step.
    ///
    /// The current time is recomputed from the step index so that repeated
    /// fractional steps do not accumulate rounding error.
    pub fn advance(&mut self) {
        self.time_index += 1;
        self.current_time = self.start_time + self.time_index as f64 * self.delta_t;
    }

    /// Fraction of the horizon already simulated
    pub fn progress(&self) -> f64 {
        if self.n_timesteps == 0 {
            return 1.0;
        }
        self.time_index as f64 / self.n_timesteps as f64
    }
}

impl Default for Time {
    fn default() -> Self {
        Self {
            delta_t: 1.0,
            end_time: 365.0,
            n_timesteps: 365,
            current_time: 0.0,
            time_index: 0,
            start_time: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_n_timesteps_floors() {
        let time = Time::new(0.3, 1.0).unwrap();
        assert_eq!(time.n_timesteps, 3);
    }

    #[test]
    fn test_due_at_interval_start() {
        let time = Time::new(1.0, 10.0).unwrap();
        assert!(time.is_due(Some(50.0)));
        assert!(time.is_due(None));

        let fine = Time::new(0.1, 10.0).unwrap();
        assert!(fine.is_due(Some(50.0)));
    }

    #[test]
    fn test_not_due_between_intervals() {
        let mut time = Time::new(1.0, 200.0).unwrap();
        time.advance();
        assert!(!time.is_due(Some(50.0)));

        for _ in 1..50 {
            time.advance();
        }
        assert_eq!(time.time_index, 50);
        assert!(time.is_due(Some(50.0)));
    }

    #[test]
    fn test_fractional_steps_hit_interval() {
        let mut time = Time::new(0.1, 100.0).unwrap();
        for _ in 0..500 {
            time.advance();
        }
        assert!(time.is_due(Some(50.0)));
        time.advance();
        assert!(!time.is_due(Some(50.0)));
    }

    #[test]
    fn test_rejects_bad_step() {
        assert!(Time::new(0.0, 10.0).is_err());
        assert!(Time::new(f64::NAN, 10.0).is_err());
    }
}
