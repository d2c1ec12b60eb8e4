use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use ldar_sim::{Emission, Emissions, Site};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::CONFIG_SCHEMA_VERSION;

#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub realization: usize,
    pub program: String,
    pub cumulative_emissions: f64,
    pub find_cost: f64,
    pub repair_cost: f64,
    pub repair_count: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub schema_version: String,
    pub seed: u64,
    pub realizations: usize,
    pub save_method: String,
    pub programs: Vec<String>,
    pub files: Vec<String>,
}

fn fmt_f64(v: f64) -> String {
    format!("{v:.10}")
}

pub fn ensure_outdir(outdir: &Path) -> Result<()> {
    fs::create_dir_all(outdir)
        .with_context(|| format!("failed to create output directory: {}", outdir.display()))
}

/// `name,comp_count` rows
pub fn read_sites_csv(path: &Path) -> Result<Vec<Site>> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open sites file: {}", path.display()))?;
    read_sites(file).with_context(|| format!("failed to parse sites file: {}", path.display()))
}

pub fn read_sites<R: Read>(reader: R) -> Result<Vec<Site>> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut sites = Vec::new();
    for row in rdr.deserialize() {
        sites.push(row?);
    }
    Ok(sites)
}

/// One emission per row; `capacity`, `repair_cost`, `start_time` and
/// `endtime` columns are optional
pub fn read_emissions_csv(path: &Path) -> Result<Emissions> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open emissions file: {}", path.display()))?;
    read_emissions(file)
        .with_context(|| format!("failed to parse emissions file: {}", path.display()))
}

pub fn read_emissions<R: Read>(reader: R) -> Result<Emissions> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut emissions = Emissions::default();
    for (line, row) in rdr.deserialize::<Emission>().enumerate() {
        emissions
            .push(row?)
            .with_context(|| format!("invalid emission on data row {}", line + 1))?;
    }
    Ok(emissions)
}

pub fn write_summary_csv(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to open summary.csv for writing: {}", path.display()))?;

    wtr.write_record([
        "realization",
        "program",
        "cumulative_emissions",
        "find_cost",
        "repair_cost",
        "repair_count",
        "schema_version",
    ])?;

    for row in rows {
        wtr.write_record([
            &row.realization.to_string(),
            row.program.as_str(),
            &fmt_f64(row.cumulative_emissions),
            &fmt_f64(row.find_cost),
            &fmt_f64(row.repair_cost),
            &fmt_f64(row.repair_count),
            CONFIG_SCHEMA_VERSION,
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_manifest_json(outdir: &Path, manifest: &Manifest) -> Result<PathBuf> {
    let path = outdir.join("manifest.json");
    let payload = serde_json::to_string_pretty(manifest).context("failed to serialize manifest")?;
    fs::write(&path, payload)
        .with_context(|| format!("failed to write manifest: {}", path.display()))?;
    Ok(path)
}
