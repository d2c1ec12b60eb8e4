//! Columnar emission ledger
//!
//! Every LDAR program holds its own copy of the ledger. Repairs only ever
//! shorten `endtime`; retirement zeroes `flux` once `endtime` has passed.

use serde::{Deserialize, Serialize};

use crate::{ensure_len, LdarError};

/// One emission source, used to build a ledger row by row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    pub flux: f64,
    #[serde(default = "unbounded")]
    pub capacity: f64,
    pub reparable: bool,
    pub site_index: usize,
    pub comp_index: usize,
    #[serde(default)]
    pub repair_cost: f64,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default = "unbounded")]
    pub endtime: f64,
}

fn unbounded() -> f64 {
    f64::INFINITY
}

impl Emission {
    pub fn new(flux: f64, reparable: bool, site_index: usize, comp_index: usize) -> Self {
        Self {
            flux,
            capacity: f64::INFINITY,
            reparable,
            site_index,
            comp_index,
            repair_cost: 0.0,
            start_time: 0.0,
            endtime: f64::INFINITY,
        }
    }
}

/// Parallel columns describing every emission of a simulation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Emissions {
    pub flux: Vec<f64>,
    pub capacity: Vec<f64>,
    pub reparable: Vec<bool>,
    pub site_index: Vec<usize>,
    pub comp_index: Vec<usize>,
    pub repair_cost: Vec<f64>,
    pub start_time: Vec<f64>,
    pub endtime: Vec<f64>,
}

impl Emissions {
    pub fn from_records<I>(records: I) -> Result<Self, LdarError>
    where
        I: IntoIterator<Item = Emission>,
    {
        let mut ledger = Self::default();
        for record in records {
            ledger.push(record)?;
        }
        Ok(ledger)
    }

    /// Append one emission. Flux is clamped to the emission's capacity.
    pub fn push(&mut self, emission: Emission) -> Result<(), LdarError> {
        if !(emission.flux.is_finite() && emission.flux >= 0.0) {
            return Err(LdarError::InvalidConfig(format!(
                "emission flux must be finite and >= 0, got {}",
                emission.flux
            )));
        }
        if emission.capacity.is_nan() || emission.capacity < 0.0 {
            return Err(LdarError::InvalidConfig(
                "emission capacity must be >= 0".to_string(),
            ));
        }
        if emission.endtime.is_nan() || emission.start_time.is_nan() {
            return Err(LdarError::InvalidConfig(
                "emission start_time and endtime must not be NaN".to_string(),
            ));
        }

        self.flux.push(emission.flux.min(emission.capacity));
        self.capacity.push(emission.capacity);
        self.reparable.push(emission.reparable);
        self.site_index.push(emission.site_index);
        self.comp_index.push(emission.comp_index);
        self.repair_cost.push(emission.repair_cost);
        self.start_time.push(emission.start_time);
        self.endtime.push(emission.endtime);
        Ok(())
    }

    pub fn n_leaks(&self) -> usize {
        self.flux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }

    /// Check that every column has the same length
    pub fn validate(&self) -> Result<(), LdarError> {
        let n = self.flux.len();
        ensure_len("emissions capacity", n, self.capacity.len())?;
        ensure_len("emissions reparable", n, self.reparable.len())?;
        ensure_len("emissions site_index", n, self.site_index.len())?;
        ensure_len("emissions comp_index", n, self.comp_index.len())?;
        ensure_len("emissions repair_cost", n, self.repair_cost.len())?;
        ensure_len("emissions start_time", n, self.start_time.len())?;
        ensure_len("emissions endtime", n, self.endtime.len())?;
        Ok(())
    }

    /// True if emission `index` is releasing gas at time `t`
    pub fn is_active(&self, index: usize, t: f64) -> bool {
        self.flux[index] > 0.0 && self.start_time[index] <= t && t < self.endtime[index]
    }

    /// Indices of the emissions active at a site, in ledger order
    pub fn active_at_site(&self, site: usize, t: f64) -> impl Iterator<Item = usize> + '_ {
        (0..self.n_leaks()).filter(move |&i| self.site_index[i] == site && self.is_active(i, t))
    }

    /// Total rate of the emissions active at a site
    pub fn site_flux(&self, site: usize, t: f64) -> f64 {
        self.active_at_site(site, t).map(|i| self.flux[i]).sum()
    }

    /// Time-averaged emission rate over `[t0, t1)`.
    ///
    /// `reparable` restricts the sum to reparable leaks (`Some(true)`) or to
    /// vents (`Some(false)`).
    pub fn em_rate_in_range(&self, t0: f64, t1: f64, reparable: Option<bool>) -> f64 {
        let span = t1 - t0;
        if span <= 0.0 {
            return 0.0;
        }

        let mut total = 0.0;
        for i in 0..self.n_leaks() {
            if reparable.is_some_and(|r| r != self.reparable[i]) {
                continue;
            }
            let overlap = self.endtime[i].min(t1) - self.start_time[i].max(t0);
            if overlap > 0.0 {
                total += self.flux[i] * overlap;
            }
        }
        total / span
    }

    /// Shorten the lifetime of emission `index`. Returns true if `endtime`
    /// strictly decreased.
    pub fn shorten_endtime(&mut self, index: usize, endtime: f64) -> bool {
        if endtime < self.endtime[index] {
            self.endtime[index] = endtime;
            true
        } else {
            false
        }
    }

    /// Zero the flux of every emission whose end time has passed. Returns the
    /// number of emissions retired by this call.
    pub fn end_emissions(&mut self, current_time: f64) -> usize {
        let mut retired = 0;
        for (flux, &end) in self.flux.iter_mut().zip(self.endtime.iter()) {
            if end <= current_time && *flux != 0.0 {
                *flux = 0.0;
                retired += 1;
            }
        }
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> Emissions {
        Emissions::from_records((0..4).map(|i| Emission {
            flux: 1.0,
            capacity: 10.0,
            reparable: i % 2 == 0,
            site_index: i / 2,
            comp_index: i % 2,
            repair_cost: 5.0,
            start_time: 0.0,
            endtime: 2.0 + i as f64,
        }))
        .unwrap()
    }

    #[test]
    fn test_rate_over_full_step() {
        let em = ledger();
        assert_eq!(em.em_rate_in_range(0.0, 1.0, None), 4.0);
        assert_eq!(em.em_rate_in_range(0.0, 1.0, Some(false)), 2.0);
    }

    #[test]
    fn test_rate_partial_overlap() {
        let em = ledger();
        // Emission 0 ends at 2.0, half way through [1.5, 2.5)
        let rate = em.em_rate_in_range(1.5, 2.5, Some(true));
        assert!((rate - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_end_emissions_zeroes_flux() {
        let mut em = ledger();
        assert_eq!(em.end_emissions(3.0), 2);
        assert_eq!(em.flux, vec![0.0, 0.0, 1.0, 1.0]);
        assert_eq!(em.end_emissions(3.0), 0);
    }

    #[test]
    fn test_shorten_never_extends() {
        let mut em = ledger();
        assert!(em.shorten_endtime(0, 1.0));
        assert!(!em.shorten_endtime(0, 4.0));
        assert_eq!(em.endtime[0], 1.0);
    }

    #[test]
    fn test_site_flux_counts_active_only() {
        let mut em = ledger();
        em.endtime[1] = 0.5;
        assert_eq!(em.site_flux(0, 1.0), 1.0);
        assert_eq!(em.active_at_site(1, 1.0).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_flux_clamped_to_capacity() {
        let mut em = Emissions::default();
        em.push(Emission {
            capacity: 0.5,
            ..Emission::new(2.0, true, 0, 0)
        })
        .unwrap();
        assert_eq!(em.flux[0], 0.5);
        assert!(em.push(Emission::new(-1.0, true, 0, 0)).is_err());
    }
}
