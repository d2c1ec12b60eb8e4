mod config;
mod io;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ldar_sim::{GasField, LdarError, Scenario};
use std::path::PathBuf;
use tracing::{info, Level};

use config::{ScenarioConfig, CONFIG_SCHEMA_VERSION};
use io::{
    ensure_outdir, read_emissions_csv, read_sites_csv, write_manifest_json, write_summary_csv,
    Manifest, SummaryRow,
};

#[derive(Debug, Parser)]
#[command(name = "ldar-sim")]
#[command(about = "Simulate leak detection and repair programs against a do-nothing baseline")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "output-ldar-sim")]
    outdir: PathBuf,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    realizations: Option<usize>,

    /// json (structured) or snapshot (pickle)
    #[arg(long)]
    save_method: Option<String>,

    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn resolve_default_config_path() -> PathBuf {
    let local = PathBuf::from("configs").join("default.toml");
    if local.exists() {
        return local;
    }

    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("configs")
        .join("default.toml")
}

fn load_field(cfg: &ScenarioConfig) -> Result<GasField> {
    let sites = read_sites_csv(&cfg.field.sites)?;
    let emissions = read_emissions_csv(&cfg.field.emissions)?;
    let mut field = GasField::new(sites, emissions).context("invalid gas field")?;
    if let Some(met) = &cfg.field.met {
        field.met_data_path = Some(met.clone());
        field
            .met_data_maker()
            .with_context(|| format!("failed to load met data: {}", met.display()))?;
    }
    Ok(field)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.quiet { Level::WARN } else { Level::INFO })
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(resolve_default_config_path);
    let mut cfg = ScenarioConfig::from_toml_file(&config_path)?;
    if let Some(seed) = cli.seed {
        cfg.seed = seed;
    }
    if let Some(n) = cli.realizations {
        if n == 0 {
            bail!("--realizations must be > 0");
        }
        cfg.realizations = n;
    }
    if let Some(method) = cli.save_method.clone() {
        cfg.save_method = method;
    }

    let field = load_field(&cfg)?;
    ensure_outdir(&cli.outdir)?;
    info!(
        sites = field.n_sites(),
        emissions = field.initial_emissions.n_leaks(),
        programs = cfg.programs.len(),
        "loaded scenario from {}",
        config_path.display()
    );

    let mut rows = Vec::new();
    let mut files = Vec::new();
    let mut program_names = Vec::new();
    for realization in 0..cfg.realizations {
        let time = cfg.time()?;
        let programs = cfg.build_programs(&field, &time)?;
        let seed = cfg.seed.wrapping_add(realization as u64);
        let mut scenario = Scenario::new(time, field.clone(), programs, seed)
            .context("failed to assemble scenario")?;

        let written = match scenario.run(&cli.outdir, !cli.quiet, &cfg.save_method) {
            Ok(path) => path,
            Err(LdarError::UnknownSaveMethod { method, written }) => {
                bail!(
                    "save method '{method}' does not exist; results were saved to {}",
                    written.display()
                );
            }
            Err(err) => return Err(err).context("simulation failed"),
        };
        files.push(written.display().to_string());

        let dt = scenario.time.delta_t;
        for (name, program) in &scenario.programs {
            rows.push(SummaryRow {
                realization,
                program: name.clone(),
                cumulative_emissions: program.cumulative_emissions(dt),
                find_cost: program.total_find_cost(),
                repair_cost: program.total_repair_cost(),
                repair_count: program.repairs.values().map(|r| r.repair_count.total()).sum(),
            });
        }
        if program_names.is_empty() {
            program_names = scenario.programs.keys().cloned().collect();
        }
    }

    write_summary_csv(&cli.outdir.join("summary.csv"), &rows)?;
    write_manifest_json(
        &cli.outdir,
        &Manifest {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            seed: cfg.seed,
            realizations: cfg.realizations,
            save_method: cfg.save_method.clone(),
            programs: program_names,
            files,
        },
    )?;

    println!("wrote outputs to {}", cli.outdir.display());
    Ok(())
}
