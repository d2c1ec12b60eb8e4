//! Terminal repair stage
//!
//! Collects emission indices from upstream detection stages and, once per
//! step, schedules their end at `current_time + repair_delay`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::{DetectionSink, StepSeries};
use crate::emissions::Emissions;
use crate::time::Time;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repair {
    /// Days between detection and the end of a repaired emission
    #[serde(default)]
    pub repair_delay: f64,
    /// Emission indices awaiting repair
    #[serde(default)]
    pub to_repair: Vec<usize>,
    #[serde(default, rename = "repair cost")]
    pub repair_cost: StepSeries,
    #[serde(default, rename = "repair count")]
    pub repair_count: StepSeries,
}

impl Repair {
    pub fn new(repair_delay: f64) -> Self {
        Self {
            repair_delay,
            ..Self::default()
        }
    }

    /// Shorten every pending reparable emission and clear the pending list.
    ///
    /// Cost and count are charged only when an end time actually moves
    /// earlier, so repeated detections of the same leak are free.
    pub fn repair(&mut self, time: &Time, emissions: &mut Emissions) -> usize {
        let step = time.time_index;
        let endtime = time.current_time + self.repair_delay;
        let mut repaired = 0;
        for i in std::mem::take(&mut self.to_repair) {
            if !emissions.reparable[i] || !emissions.shorten_endtime(i, endtime) {
                continue;
            }
            self.repair_cost.add(step, emissions.repair_cost[i]);
            self.repair_count.add(step, 1.0);
            repaired += 1;
        }
        if repaired > 0 {
            debug!(step, repaired, "repair");
        }
        repaired
    }
}

impl DetectionSink for Repair {
    fn action(&mut self, targets: &[usize]) {
        self.to_repair.extend_from_slice(targets);
    }
}
