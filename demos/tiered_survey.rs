//! Tiered Survey Example
//!
//! Compares a weekly aerial screen with OGI follow-up against a quarterly OGI
//! program and the do-nothing baseline on a randomly generated field

use indexmap::IndexMap;
use ldar_sim::{
    CompSurvey, DispatchTarget, Emission, Emissions, GasField, LdarProgram, Repair, SaveMethod,
    Scenario, Site, SiteSurvey, Time,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use std::error::Error;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

fn build_field(
    n_sites: usize,
    n_leaks: usize,
    horizon: f64,
    seed: u64,
) -> Result<GasField, Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let flux = LogNormal::new(0.0, 1.2)?;

    let sites: Vec<Site> = (0..n_sites)
        .map(|i| Site::new(format!("site{i:03}"), rng.gen_range(20..120)))
        .collect();

    let mut emissions = Emissions::default();
    for _ in 0..n_leaks {
        let site_index = rng.gen_range(0..n_sites);
        let comp_index = rng.gen_range(0..sites[site_index].comp_count);
        let start_time = rng.gen_range(0.0..horizon);
        emissions.push(Emission {
            repair_cost: 200.0,
            start_time,
            // Natural end somewhere between three months and two years later
            endtime: start_time + rng.gen_range(90.0..730.0),
            ..Emission::new(flux.sample(&mut rng), true, site_index, comp_index)
        })?;
    }
    // A vent at every tenth site
    for site_index in (0..n_sites).step_by(10) {
        emissions.push(Emission::new(0.3, false, site_index, 0))?;
    }

    Ok(GasField::new(sites, emissions)?)
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("Running LDAR tiered survey simulation...\n");

    let horizon = 365.0;
    let time = Time::new(1.0, horizon)?;
    let field = build_field(100, 400, horizon, 42)?;

    println!("Configuration:");
    println!("  Sites:        {}", field.n_sites());
    println!("  Emissions:    {}", field.initial_emissions.n_leaks());
    println!("  Horizon:      {} days", horizon);
    println!();

    let mut programs = IndexMap::new();

    // Tiered: weekly aerial screen feeding an on-demand OGI crew
    let mut technologies = IndexMap::new();
    technologies.insert(
        "aerial".to_string(),
        SiteSurvey::new(DispatchTarget::technology("ogi_fu"))
            .with_survey_interval(Some(7.0))
            .with_capacity(200.0, 80.0)
            .into(),
    );
    technologies.insert(
        "ogi_fu".to_string(),
        CompSurvey::new(DispatchTarget::repair("crew")).into(),
    );
    let mut repairs = IndexMap::new();
    repairs.insert("crew".to_string(), Repair::new(7.0));
    programs.insert(
        "tiered".to_string(),
        LdarProgram::new(&field, &time, technologies, repairs)?,
    );

    // Single stage: quarterly OGI campaign, several crews covering the field in a day
    let mut technologies = IndexMap::new();
    technologies.insert(
        "ogi".to_string(),
        CompSurvey::new(DispatchTarget::repair("crew"))
            .with_survey_interval(Some(91.0))
            .with_survey_speed(900.0, 600.0)
            .into(),
    );
    let mut repairs = IndexMap::new();
    repairs.insert("crew".to_string(), Repair::new(7.0));
    programs.insert(
        "ogi".to_string(),
        LdarProgram::new(&field, &time, technologies, repairs)?,
    );

    let mut scenario = Scenario::new(time, field, programs, 7)?;
    scenario.simulate(false)?;

    let dt = scenario.time.delta_t;
    println!("PROGRAM SUMMARY");
    println!("===============");
    for (name, program) in &scenario.programs {
        println!("\n{name}:");
        println!("  Cumulative emissions: {:.2}", program.cumulative_emissions(dt));
        println!("  Find cost:            {:.2}", program.total_find_cost());
        println!("  Repair cost:          {:.2}", program.total_repair_cost());
    }

    // Write CSV
    fs::create_dir_all("out")?;
    let csv_path = Path::new("out/tiered_survey.csv");
    let mut file = File::create(csv_path)?;
    let names: Vec<&String> = scenario.programs.keys().collect();
    writeln!(
        file,
        "t,{}",
        names.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(",")
    )?;
    for step in 0..scenario.time.n_timesteps {
        let row: Vec<String> = scenario
            .programs
            .values()
            .map(|p| format!("{:.6}", p.emissions_timeseries[step]))
            .collect();
        writeln!(file, "{:.2},{}", step as f64 * dt, row.join(","))?;
    }

    let saved = scenario.save(Path::new("out"), SaveMethod::Json)?;
    println!("\nCSV output written to: {}", csv_path.display());
    println!("Realization written to: {}", saved.display());
    println!("Done!");

    Ok(())
}
