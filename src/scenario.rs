//! Top-level scenario driver
//!
//! Advances the clock, runs every program once per step against the shared
//! read-only gas field and persists one realization per run.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::{DeploymentRecord, StepSeries};
use crate::field::GasField;
use crate::program::LdarProgram;
use crate::time::Time;
use crate::{ensure_len, LdarError};

/// Output format of a realization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMethod {
    /// Human-readable JSON of the result series
    Json,
    /// Binary snapshot of the whole scenario, reloadable with
    /// [`Scenario::load_snapshot`]
    Snapshot,
}

impl SaveMethod {
    fn extension(self) -> &'static str {
        match self {
            SaveMethod::Json => "json",
            SaveMethod::Snapshot => "bin",
        }
    }
}

impl FromStr for SaveMethod {
    type Err = LdarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" | "structured" => Ok(SaveMethod::Json),
            "snapshot" | "pickle" => Ok(SaveMethod::Snapshot),
            other => Err(LdarError::InvalidConfig(format!(
                "unknown save method '{other}'"
            ))),
        }
    }
}

/// Cost and count series of one repair stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairResults {
    #[serde(rename = "repair cost")]
    pub repair_cost: StepSeries,
    #[serde(rename = "repair count")]
    pub repair_count: StepSeries,
}

/// Accumulators of one named stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageResults {
    Repair(RepairResults),
    Technology(DeploymentRecord),
}

/// Persisted results of one program.
///
/// Each technology and repair stage sits under its own name next to the rate
/// series, in program order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramResults {
    #[serde(rename = "emission timeseries")]
    pub emissions: Vec<f64>,
    #[serde(rename = "vent timeseries")]
    pub vents: Vec<f64>,
    #[serde(flatten)]
    pub stages: IndexMap<String, StageResults>,
}

impl ProgramResults {
    pub fn technology(&self, name: &str) -> Option<&DeploymentRecord> {
        match self.stages.get(name)? {
            StageResults::Technology(record) => Some(record),
            StageResults::Repair(_) => None,
        }
    }

    pub fn repair(&self, name: &str) -> Option<&RepairResults> {
        match self.stages.get(name)? {
            StageResults::Repair(results) => Some(results),
            StageResults::Technology(_) => None,
        }
    }
}

impl From<&LdarProgram> for ProgramResults {
    fn from(program: &LdarProgram) -> Self {
        let technologies = program
            .technologies
            .iter()
            .map(|(name, tech)| (name.clone(), StageResults::Technology(tech.record().clone())));
        let repairs = program.repairs.iter().map(|(name, rep)| {
            (
                name.clone(),
                StageResults::Repair(RepairResults {
                    repair_cost: rep.repair_cost.clone(),
                    repair_count: rep.repair_count.clone(),
                }),
            )
        });
        Self {
            emissions: program.emissions_timeseries.clone(),
            vents: program.vents_timeseries.clone(),
            stages: technologies.chain(repairs).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub time: Time,
    pub gas_field: GasField,
    pub programs: IndexMap<String, LdarProgram>,
    rng: ChaCha8Rng,
}

impl Scenario {
    /// Name of the do-nothing baseline program
    pub const NULL_PROGRAM: &'static str = "Null";

    pub fn new(
        time: Time,
        gas_field: GasField,
        programs: IndexMap<String, LdarProgram>,
        seed: u64,
    ) -> Result<Self, LdarError> {
        gas_field.validate()?;
        for program in programs.values() {
            ensure_len("program find_cost", time.n_timesteps + 1, program.find_cost.len())?;
            program.validate(&gas_field)?;
        }
        Ok(Self {
            time,
            gas_field,
            programs,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Add the baseline program unless one is already configured
    pub fn ensure_null_program(&mut self) {
        if !self.programs.contains_key(Self::NULL_PROGRAM) {
            let null = LdarProgram::null(&self.gas_field, &self.time);
            self.programs.insert(Self::NULL_PROGRAM.to_string(), null);
        }
    }

    /// Count initial emissions that end within a single step of starting and
    /// warn about them
    pub fn check_timestep(&self) -> usize {
        let em = &self.gas_field.initial_emissions;
        let short = (0..em.n_leaks())
            .filter(|&i| {
                let lifetime = em.endtime[i] - em.start_time[i];
                lifetime > 0.0 && lifetime < self.time.delta_t
            })
            .count();
        if short > 0 {
            warn!(
                short,
                delta_t = self.time.delta_t,
                "emissions shorter than one timestep may be missed; consider a smaller delta_t"
            );
        }
        short
    }

    /// Run every remaining step of the horizon
    pub fn simulate(&mut self, display_status: bool) -> Result<(), LdarError> {
        self.ensure_null_program();
        let n = self.time.n_timesteps;
        let tenth = (n / 10).max(1);

        while self.time.time_index < n {
            let step = self.time.time_index;
            if display_status && step % tenth == 0 {
                info!(
                    step,
                    n_timesteps = n,
                    percent = (100.0 * self.time.progress()).round(),
                    "simulating"
                );
            }
            for program in self.programs.values_mut() {
                program.action(&self.time, &self.gas_field, &mut self.rng)?;
                program.record_rates(&self.time);
            }
            self.time.advance();
        }
        if display_status {
            info!(n_timesteps = n, "simulation complete");
        }
        Ok(())
    }

    /// Simulate the horizon and save one realization to `dir_out`.
    ///
    /// An unrecognized `save_method` still writes the JSON form and then
    /// reports the bad method along with the path written.
    pub fn run(
        &mut self,
        dir_out: &Path,
        display_status: bool,
        save_method: &str,
    ) -> Result<PathBuf, LdarError> {
        self.check_timestep();
        self.simulate(display_status)?;

        match save_method.parse::<SaveMethod>() {
            Ok(method) => self.save(dir_out, method),
            Err(_) => {
                let written = self.save(dir_out, SaveMethod::Json)?;
                Err(LdarError::UnknownSaveMethod {
                    method: save_method.to_string(),
                    written,
                })
            }
        }
    }

    pub fn results(&self) -> IndexMap<String, ProgramResults> {
        self.programs
            .iter()
            .map(|(name, program)| (name.clone(), ProgramResults::from(program)))
            .collect()
    }

    /// Write `realization<N>.json`, plus `realization<N>.bin` for
    /// [`SaveMethod::Snapshot`], and return the path of the requested form.
    ///
    /// `N` counts the JSON realizations already in `dir_out`, skipping forward
    /// past any name in use.
    pub fn save(&self, dir_out: &Path, method: SaveMethod) -> Result<PathBuf, LdarError> {
        fs::create_dir_all(dir_out)?;
        let json_ext = SaveMethod::Json.extension();
        let mut n = 0;
        for entry in fs::read_dir(dir_out)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == json_ext) {
                n += 1;
            }
        }
        let realization = |n: usize, method: SaveMethod| {
            dir_out.join(format!("realization{n}.{}", method.extension()))
        };
        while realization(n, SaveMethod::Json).exists() || realization(n, method).exists() {
            n += 1;
        }

        let json_path = realization(n, SaveMethod::Json);
        let text = serde_json::to_string_pretty(&self.results())?;
        fs::write(&json_path, text)?;
        info!(path = %json_path.display(), "saved realization");

        if method == SaveMethod::Snapshot {
            let path = realization(n, SaveMethod::Snapshot);
            let bytes = bitcode::serialize(self)?;
            fs::write(&path, bytes)?;
            info!(path = %path.display(), "saved snapshot");
            return Ok(path);
        }
        Ok(json_path)
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, LdarError> {
        let bytes = fs::read(path)?;
        Ok(bitcode::deserialize(&bytes)?)
    }

    pub fn load_results(path: &Path) -> Result<IndexMap<String, ProgramResults>, LdarError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
