#![allow(dead_code)]

use indexmap::IndexMap;
use ldar_sim::{
    CompSurvey, DetectionCurve, DetectionModel, DetectionVariable, DispatchTarget, Emission,
    Emissions, GasField, LdarProgram, Repair, Scenario, Site, SiteSurvey, Time,
};

pub const N_SITES: usize = 20;
pub const HORIZON: f64 = 60.0;

/// Twenty ten-component sites with forty leaks of rate 2 appearing every
/// day and a half, plus one vent that runs all horizon
pub fn staggered_field() -> GasField {
    let sites = (0..N_SITES)
        .map(|s| Site::new(format!("pad{s:02}"), 10))
        .collect();
    let leaks = (0..40).map(|j| Emission {
        repair_cost: 200.0,
        start_time: j as f64 * 1.5,
        ..Emission::new(2.0, true, j % N_SITES, j / N_SITES)
    });
    let vent = Emission::new(0.5, false, 0, 9);
    let emissions = Emissions::from_records(leaks.chain(std::iter::once(vent))).unwrap();
    GasField::new(sites, emissions).unwrap()
}

pub fn time() -> Time {
    Time::new(1.0, HORIZON).unwrap()
}

/// Detects anything emitting at least 0.5
pub fn certain() -> DetectionModel {
    DetectionModel::Empirical(DetectionCurve::from_1d(vec![0.0, 0.5], vec![0.0, 1.0]).unwrap())
}

fn crew() -> IndexMap<String, Repair> {
    let mut repairs = IndexMap::new();
    repairs.insert("crew".to_string(), Repair::new(0.0));
    repairs
}

/// Weekly aerial screening feeding an on-demand OGI follow-up
pub fn tiered_program(field: &GasField, time: &Time, model: DetectionModel) -> LdarProgram {
    let mut technologies = IndexMap::new();
    technologies.insert(
        "aerial".to_string(),
        SiteSurvey::new(DispatchTarget::technology("ogi_fu"))
            .with_survey_interval(Some(7.0))
            .with_detection(vec![DetectionVariable::flux()], model.clone())
            .into(),
    );
    technologies.insert(
        "ogi_fu".to_string(),
        CompSurvey::new(DispatchTarget::repair("crew"))
            .with_detection(vec![DetectionVariable::flux()], model)
            .into(),
    );
    LdarProgram::new(field, time, technologies, crew()).unwrap()
}

/// Monthly OGI survey of every site
pub fn ogi_program(field: &GasField, time: &Time, model: DetectionModel) -> LdarProgram {
    let mut technologies = IndexMap::new();
    technologies.insert(
        "ogi".to_string(),
        CompSurvey::new(DispatchTarget::repair("crew"))
            .with_survey_interval(Some(30.0))
            .with_detection(vec![DetectionVariable::flux()], model)
            .into(),
    );
    LdarProgram::new(field, time, technologies, crew()).unwrap()
}

pub fn scenario(model: DetectionModel, seed: u64) -> Scenario {
    let field = staggered_field();
    let time = time();
    let mut programs = IndexMap::new();
    programs.insert("tiered".to_string(), tiered_program(&field, &time, model.clone()));
    programs.insert("ogi".to_string(), ogi_program(&field, &time, model));
    Scenario::new(time, field, programs, seed).unwrap()
}
