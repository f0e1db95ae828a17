//! RoboCTAB protocol configuration (YAML)
//!
//! # Philosophy
//! Everything an operator may change between runs lives in one immutable
//! [`ProtocolConfig`]. The canonical form is YAML; every field has a default,
//! so an empty document describes the stock protocol (four full plates,
//! 40 uL elution buffer, pipette mixing).
//!
//! Validation is strict and happens before any plan is built.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::addressing::{active_plate_count, ColumnRange};
use crate::core::{LabwareKind, LabwareRole, MAX_PLATES};
use crate::distribution::TRANSIT_AIR_GAP;
use crate::error::{ProtocolError, Result};

// =============================================================================
// Schema
// =============================================================================

/// Smallest tip capacity the protocol can run with (uL).
pub const MIN_CAPACITY: f64 = 300.0;

/// How chloroform is mixed into the lysate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChloroformMixing {
    /// Repeated aspirate/dispense in the liquid. Up to ~5 mg of well-ground tissue.
    #[default]
    PipetteMixing,
    /// Air blown through the liquid. For heavier or poorly ground samples.
    BubbleMixing,
    /// Chloroform only; the operator vortexes or inverts the plates.
    NoMixing,
}

/// Labware API names handed to the driver at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabwareNames {
    pub tip_rack: String,
    pub sample_plate: String,
    pub final_plate: String,
    /// Needs a working capacity of at least 200 mL.
    pub reservoir: String,
}

impl Default for LabwareNames {
    fn default() -> Self {
        Self {
            tip_rack: "opentrons_96_tiprack_300ul".into(),
            sample_plate: "1.2ml_simport_vwr_t1102_96well".into(),
            final_plate: "1.2ml_simport_vwr_t1102_96well".into(),
            reservoir: "agilent_1_reservoir_290ml".into(),
        }
    }
}

impl LabwareNames {
    pub fn load_name(&self, role: LabwareRole) -> &str {
        match role.kind() {
            LabwareKind::TipRack => &self.tip_rack,
            LabwareKind::SamplePlate => &self.sample_plate,
            LabwareKind::FinalPlate => &self.final_plate,
            LabwareKind::Reservoir => &self.reservoir,
        }
    }
}

/// Top-level YAML document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Column range per sample plate; `first: 0` switches a plate off.
    pub plates: Vec<ColumnRange>,
    /// Elution buffer resuspending the DNA pellet (uL per well).
    pub elution_buffer_volume: f64,
    /// TE buffer added before grinding (uL per well).
    pub water_volume: f64,
    /// Dispense height above the well bottom for the TE buffer (mm).
    pub water_dispense_height: f64,
    pub labware: LabwareNames,
    pub chloroform_mixing: ChloroformMixing,
    /// Pipette the isopropanol off instead of asking the operator to invert.
    pub pipette_off_isopropanol: bool,
    pub pipette_off_ethanol: bool,
    /// Height (mm) of 400 uL of water in an empty sample well; the aqueous /
    /// chloroform interface sits there after centrifugation.
    pub interstice_height: f64,
    /// Maximum volume one tip can hold (uL).
    pub capacity: f64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            plates: vec![ColumnRange::FULL; MAX_PLATES],
            elution_buffer_volume: 40.0,
            water_volume: 50.0,
            water_dispense_height: 40.0,
            labware: LabwareNames::default(),
            chloroform_mixing: ChloroformMixing::default(),
            pipette_off_isopropanol: false,
            pipette_off_ethanol: false,
            interstice_height: 14.0,
            capacity: 300.0,
        }
    }
}

// =============================================================================
// Public API
// =============================================================================

impl ProtocolConfig {
    /// Load, parse and validate a YAML configuration file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| ProtocolError::io(e, path.display().to_string()))?;
        let config = Self::from_yaml(&raw).map_err(|e| match e {
            ProtocolError::Config(msg) => {
                ProtocolError::Config(format!("{msg} (in file: {})", path.display()))
            }
            other => other,
        })?;
        log::debug!("Loaded protocol configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        // An empty document parses as null; treat it as "all defaults".
        let config: ProtocolConfig = if raw.trim().is_empty() {
            ProtocolConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Canonical YAML form.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Strict pre-flight checks; prefers failing with an actionable message
    /// over letting a malformed configuration reach the planner.
    pub fn validate(&self) -> Result<()> {
        for (i, range) in self.plates.iter().enumerate() {
            range.validate(i + 1)?;
        }
        active_plate_count(&self.plates)?;

        positive("capacity", self.capacity)?;
        positive("water_volume", self.water_volume)?;
        positive("elution_buffer_volume", self.elution_buffer_volume)?;
        positive("water_dispense_height", self.water_dispense_height)?;
        // Per-well steps load full 300 uL tips.
        if self.capacity < MIN_CAPACITY {
            return Err(ProtocolError::config(format!(
                "capacity {} uL is below the {MIN_CAPACITY} uL the per-well steps load",
                self.capacity
            )));
        }
        for (field, volume) in [
            ("water_volume", self.water_volume),
            ("elution_buffer_volume", self.elution_buffer_volume),
        ] {
            if volume < TRANSIT_AIR_GAP {
                return Err(ProtocolError::config(format!(
                    "{field} {volume} uL is below the {TRANSIT_AIR_GAP} uL transit air gap"
                )));
            }
        }
        if self.water_volume > self.capacity {
            return Err(ProtocolError::config(format!(
                "water_volume {} uL exceeds pipette capacity {} uL",
                self.water_volume, self.capacity
            )));
        }
        if self.elution_buffer_volume > self.capacity {
            return Err(ProtocolError::config(format!(
                "elution_buffer_volume {} uL exceeds pipette capacity {} uL",
                self.elution_buffer_volume, self.capacity
            )));
        }
        // The mixing depth sits 7 mm below the interface.
        if !(self.interstice_height > 7.0 && self.interstice_height <= 40.0) {
            return Err(ProtocolError::config(format!(
                "interstice_height must be in (7, 40] mm, got {}",
                self.interstice_height
            )));
        }
        for (field, name) in [
            ("labware.tip_rack", &self.labware.tip_rack),
            ("labware.sample_plate", &self.labware.sample_plate),
            ("labware.final_plate", &self.labware.final_plate),
            ("labware.reservoir", &self.labware.reservoir),
        ] {
            if name.trim().is_empty() {
                return Err(ProtocolError::config(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn plate_count(&self) -> Result<usize> {
        active_plate_count(&self.plates)
    }

    /// Ranges of the active plates only.
    pub fn active_ranges(&self) -> Result<&[ColumnRange]> {
        let n = self.plate_count()?;
        Ok(&self.plates[..n])
    }

    pub fn total_columns(&self) -> usize {
        self.plates.iter().map(|r| r.len()).sum()
    }

    /// SHA-256 of the canonical YAML; identifies the configuration a run used.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = self.to_yaml()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

fn positive(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ProtocolError::config(format!(
            "{field} must be a positive number, got {value}"
        )))
    }
}
