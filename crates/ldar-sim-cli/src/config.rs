use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use ldar_sim::{GasField, LdarProgram, Repair, Technology, Time};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

fn default_realizations() -> usize {
    1
}

fn default_save_method() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub schema_version: String,
    /// Step length [days]
    pub delta_t: f64,
    /// Horizon [days]
    pub end_time: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_realizations")]
    pub realizations: usize,
    #[serde(default = "default_save_method")]
    pub save_method: String,
    pub field: FieldConfig,
    #[serde(default)]
    pub programs: IndexMap<String, ProgramConfig>,
}

/// Input files describing the gas field; relative paths resolve against the
/// config file's directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub sites: PathBuf,
    pub emissions: PathBuf,
    #[serde(default)]
    pub met: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramConfig {
    #[serde(default)]
    pub technologies: IndexMap<String, Technology>,
    #[serde(default)]
    pub repairs: IndexMap<String, Repair>,
}

impl ScenarioConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut cfg: ScenarioConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse TOML config: {}", path.display()))?;
        if let Some(base) = path.parent() {
            cfg.field.resolve_paths(base);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != CONFIG_SCHEMA_VERSION {
            bail!(
                "config schema_version {} does not match {}",
                self.schema_version,
                CONFIG_SCHEMA_VERSION
            );
        }
        if !(self.delta_t.is_finite() && self.delta_t > 0.0) {
            bail!("delta_t must be > 0");
        }
        if !(self.end_time.is_finite() && self.end_time >= self.delta_t) {
            bail!("end_time must cover at least one step");
        }
        if self.realizations == 0 {
            bail!("realizations must be > 0");
        }
        if let Some(name) = self
            .programs
            .keys()
            .find(|name| name.as_str() == ldar_sim::Scenario::NULL_PROGRAM)
        {
            bail!("program name '{name}' is reserved for the baseline");
        }
        Ok(())
    }

    pub fn time(&self) -> Result<Time> {
        Time::new(self.delta_t, self.end_time).context("invalid time configuration")
    }

    /// Fresh programs for one realization
    pub fn build_programs(
        &self,
        gas_field: &GasField,
        time: &Time,
    ) -> Result<IndexMap<String, LdarProgram>> {
        let mut programs = IndexMap::new();
        for (name, program) in &self.programs {
            let built = LdarProgram::new(
                gas_field,
                time,
                program.technologies.clone(),
                program.repairs.clone(),
            )
            .with_context(|| format!("invalid program '{name}'"))?;
            programs.insert(name.clone(), built);
        }
        Ok(programs)
    }
}

impl FieldConfig {
    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.sites);
        resolve(&mut self.emissions);
        if let Some(met) = self.met.as_mut() {
            resolve(met);
        }
    }
}
