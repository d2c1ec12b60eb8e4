//! Gas field topology and meteorological inputs
//!
//! The field is consumed read-only by the detection stages: site topology,
//! the initial emission ledger, and hourly weather series used for
//! operational-envelope gating and detection conditions.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::detection::{Aggregation, OperatingHours};
use crate::emissions::Emissions;
use crate::time::Time;
use crate::LdarError;

const HOURS_PER_DAY: f64 = 24.0;

/// TMY3 column headers and the variable names they are exposed under
const TMY3_ALIASES: [(&str, &str); 9] = [
    ("Wspd (m/s)", "wind speed"),
    ("Wdir (degrees)", "wind direction"),
    ("Dry-bulb (C)", "temperature"),
    ("RHum (%)", "relative humidity"),
    ("Lprecip depth (mm)", "precipitation"),
    ("Alb (unitless)", "albedo"),
    ("CeilHgt (m)", "ceiling height"),
    ("TotCld (tenths)", "cloud cover"),
    ("GHI (W/m^2)", "solar intensity"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    /// Number of surveyable components at the site
    pub comp_count: usize,
}

impl Site {
    pub fn new(name: impl Into<String>, comp_count: usize) -> Self {
        Self {
            name: name.into(),
            comp_count,
        }
    }
}

/// Hourly meteorological series keyed by variable name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetData {
    series: IndexMap<String, Vec<f64>>,
}

impl MetData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, hourly: Vec<f64>) {
        self.series.insert(name.into(), hourly);
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.series.contains_key(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, LdarError> {
        Self::from_csv_reader(File::open(path)?)
    }

    /// Parse an hourly CSV, one row per hour.
    ///
    /// A leading metadata row whose width differs from the header row (as in
    /// TMY3 files) is skipped. Columns that are not entirely numeric are
    /// ignored. Known TMY3 headers are renamed to their variable names.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, LdarError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut records = Vec::new();
        for record in rdr.records() {
            records.push(record?);
        }
        if records.len() > 1 && records[0].len() != records[1].len() {
            records.remove(0);
        }
        let Some((header, rows)) = records.split_first() else {
            return Ok(Self::default());
        };

        let mut met = Self::default();
        for (col, name) in header.iter().enumerate() {
            let values: Option<Vec<f64>> = rows
                .iter()
                .map(|row| row.get(col).and_then(|v| v.parse::<f64>().ok()))
                .collect();
            let Some(values) = values else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            let name = TMY3_ALIASES
                .iter()
                .find(|(header, _)| *header == name)
                .map(|(_, alias)| *alias)
                .unwrap_or(name);
            met.insert(name, values);
        }
        Ok(met)
    }

    /// Aggregate a variable over the operating-hours window of the day that
    /// contains `time.current_time`. Hour indices wrap around the series.
    pub fn aggregate(
        &self,
        name: &str,
        time: &Time,
        ophrs: &OperatingHours,
        aggregation: Aggregation,
    ) -> Result<f64, LdarError> {
        let series = self
            .get(name)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LdarError::MissingMetVariable(name.to_string()))?;

        let day_start = time.current_time.floor() * HOURS_PER_DAY;
        let begin = (day_start + ophrs.begin).floor() as i64;
        let end = ((day_start + ophrs.end).ceil() as i64).max(begin + 1);
        let len = series.len() as i64;
        let window = (begin..end).map(|h| series[h.rem_euclid(len) as usize]);
        Ok(aggregation.apply(window))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GasField {
    pub sites: Vec<Site>,
    pub initial_emissions: Emissions,
    #[serde(default)]
    pub met: MetData,
    #[serde(default)]
    pub met_data_path: Option<PathBuf>,
}

impl GasField {
    pub fn new(sites: Vec<Site>, initial_emissions: Emissions) -> Result<Self, LdarError> {
        let field = Self {
            sites,
            initial_emissions,
            met: MetData::default(),
            met_data_path: None,
        };
        field.validate()?;
        Ok(field)
    }

    pub fn with_met(mut self, met: MetData) -> Self {
        self.met = met;
        self
    }

    pub fn n_sites(&self) -> usize {
        self.sites.len()
    }

    /// Every site identifier in field order
    pub fn site_ids(&self) -> Vec<usize> {
        (0..self.n_sites()).collect()
    }

    /// Load `met` from `met_data_path`
    pub fn met_data_maker(&mut self) -> Result<(), LdarError> {
        let path = self.met_data_path.as_ref().ok_or_else(|| {
            LdarError::InvalidConfig("met_data_path is not set".to_string())
        })?;
        self.met = MetData::from_csv_path(path)?;
        Ok(())
    }

    /// Check that every emission points at an existing site and component
    pub fn validate(&self) -> Result<(), LdarError> {
        let em = &self.initial_emissions;
        em.validate()?;
        for i in 0..em.n_leaks() {
            let site = self.sites.get(em.site_index[i]).ok_or_else(|| {
                LdarError::InvalidConfig(format!(
                    "emission {i} refers to site {} but the field has {} sites",
                    em.site_index[i],
                    self.n_sites()
                ))
            })?;
            if em.comp_index[i] >= site.comp_count {
                return Err(LdarError::InvalidConfig(format!(
                    "emission {i} refers to component {} but site '{}' has {} components",
                    em.comp_index[i], site.name, site.comp_count
                )));
            }
        }
        Ok(())
    }
}
