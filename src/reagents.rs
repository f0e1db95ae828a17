// src/reagents.rs
//
// =============================================================================
// ROBOCTAB: REAGENT PREPARATION & STEP TIMING
// =============================================================================
//
// Bench-side numbers shown to the operator in pause messages: how much of
// each reagent to prepare for the run, and roughly how long the slow
// per-column steps take.

use crate::config::ChloroformMixing;
use serde::{Deserialize, Serialize};

/// Extra samples' worth of reagent to cover reservoir dead volume.
pub const DEAD_VOLUME_SAMPLES: usize = 20;
/// Wells per column (8-channel head).
pub const WELLS_PER_COLUMN: usize = 8;

fn round_to(value: f64, decimals: i32) -> f64 {
    let m = 10f64.powi(decimals);
    (value * m).round() / m
}

/// Quantities to prepare for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReagentRecipe {
    pub samples: usize,
    pub metabisulfite_g: f64,
    pub pvp_k29_g: f64,
    pub lysis_solution_a_ml: f64,
    pub lysis_solution_b_ml: f64,
    pub sarkosyl_ml: f64,
    pub rnase_ul: u64,
    /// Chloroform : isoamyl alcohol is 24 : 1.
    pub chloroform_ml: u64,
    pub isoamyl_alcohol_ml: u64,
    /// 70% ethanol made from 95% stock.
    pub ethanol_95_ml: u64,
    pub ethanol_water_ml: u64,
}

impl ReagentRecipe {
    pub fn for_columns(columns: usize) -> Self {
        let samples = columns * WELLS_PER_COLUMN;
        let n = (samples + DEAD_VOLUME_SAMPLES) as f64;

        let isoamyl = ((n * 0.4) / 24.0).ceil() as u64;

        let ethanol_total = (n * 0.3).round() as u64;
        let ethanol_95 = round_to(0.7 * ethanol_total as f64 / 0.95, 1).trunc() as u64;

        Self {
            samples,
            metabisulfite_g: round_to(n * 0.0028, 3),
            pvp_k29_g: round_to(n * 0.0056, 3),
            lysis_solution_a_ml: round_to(n * 0.2344, 1),
            lysis_solution_b_ml: round_to(n * 0.2344, 1),
            sarkosyl_ml: round_to(n * 0.0938, 1),
            rnase_ul: (n * 0.2812).round() as u64,
            chloroform_ml: isoamyl * 24,
            isoamyl_alcohol_ml: isoamyl,
            ethanol_95_ml: ethanol_95,
            ethanol_water_ml: ethanol_total.saturating_sub(ethanol_95),
        }
    }

    pub fn lysis_instructions(&self) -> String {
        format!(
            "Set water bath at 65C. Prepare fresh working buffer: Stock Lysis Solution A {}mL + \
             Stock Lysis Solution B {}mL + Sarkosyl {}mL + Metabisulfite {}g + PVP-K-29 {}g. \
             Store solution at 65C. Add {}uL of RNase right before using the solution",
            self.lysis_solution_a_ml,
            self.lysis_solution_b_ml,
            self.sarkosyl_ml,
            self.metabisulfite_g,
            self.pvp_k29_g,
            self.rnase_ul
        )
    }

    pub fn solvent_instructions(&self) -> String {
        format!(
            "Chloroform-isoamyl prep.: Chloroform {}mL + Isoamyl alcohol {}mL // \
             Ethanol 70% prep.: DD water {}mL + Ethanol 95% {}mL (store at -20C)",
            self.chloroform_ml, self.isoamyl_alcohol_ml, self.ethanol_water_ml, self.ethanol_95_ml
        )
    }
}

/// Per-column durations (s) of the slow steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedStep {
    Chloroform(ChloroformMixing),
    SupernatantTransfer,
    IsopropanolPipetteOff,
    EthanolPipetteOff,
}

impl TimedStep {
    pub fn seconds_per_column(self) -> f64 {
        match self {
            TimedStep::Chloroform(ChloroformMixing::NoMixing) => 7.0,
            TimedStep::Chloroform(_) => 77.0,
            TimedStep::SupernatantTransfer => 45.0,
            TimedStep::IsopropanolPipetteOff => 55.0,
            TimedStep::EthanolPipetteOff => 32.0,
        }
    }

    /// Estimated minutes for `columns`, truncated to one decimal.
    pub fn minutes(self, columns: usize) -> f64 {
        let minutes = self.seconds_per_column() * columns as f64 / 60.0;
        (minutes * 10.0).trunc() / 10.0
    }
}
