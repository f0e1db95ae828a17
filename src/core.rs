// src/core.rs
//
// =============================================================================
// ROBOCTAB: CORE SCHEMA
// =============================================================================
//
// Shared vocabulary between the planner, the deck scheduler and the drivers.
//
// Design Principles:
// 1. Newtype Pattern: volumes and slots are not bare numbers.
// 2. Locations are immutable values; anchors derive new locations.
// 3. Labware identity is its protocol role, never an index into a table.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// 1. TYPE-SAFE UNITS
// ============================================================================

/// Liquid volume in microliters (uL).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd, Default)]
pub struct Microliters(pub f64);

impl fmt::Display for Microliters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}uL", self.0)
    }
}

/// A numbered deck slot. Slots 1-11 are usable; slot 12 is the fixed trash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u8);

impl SlotId {
    pub const TRASH: SlotId = SlotId(12);

    pub fn is_usable(self) -> bool {
        (1..=11).contains(&self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of columns on every plate and tip rack used by the protocol.
pub const PLATE_COLUMNS: u8 = 12;

/// Highest number of sample plates a single run can process.
pub const MAX_PLATES: usize = 4;

// ============================================================================
// 2. LABWARE IDENTITY
// ============================================================================

/// The logical role a piece of labware plays in the protocol.
///
/// Plate and rack indices are 1-based and follow the sample plate they serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "role", content = "index", rename_all = "snake_case")]
pub enum LabwareRole {
    SamplePlate(u8),
    FinalPlate(u8),
    /// Tips used once per column for chloroform mixing, then decontaminated.
    MixingTips(u8),
    /// Tips reused for supernatant transfer and the pipette-off washes.
    TransferTips(u8),
    /// Rack serving the shared reagent tips (isopropanol, ethanol, elution).
    ReagentTips,
    ReagentReservoir,
    WaterReservoir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabwareKind {
    TipRack,
    SamplePlate,
    FinalPlate,
    Reservoir,
}

impl LabwareRole {
    pub fn kind(self) -> LabwareKind {
        match self {
            LabwareRole::SamplePlate(_) => LabwareKind::SamplePlate,
            LabwareRole::FinalPlate(_) => LabwareKind::FinalPlate,
            LabwareRole::MixingTips(_) | LabwareRole::TransferTips(_) | LabwareRole::ReagentTips => {
                LabwareKind::TipRack
            }
            LabwareRole::ReagentReservoir | LabwareRole::WaterReservoir => LabwareKind::Reservoir,
        }
    }
}

impl fmt::Display for LabwareRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabwareRole::SamplePlate(i) => write!(f, "samples plate {i}"),
            LabwareRole::FinalPlate(i) => write!(f, "final plate {i}"),
            LabwareRole::MixingTips(i) => write!(f, "mixing tip rack {i}"),
            LabwareRole::TransferTips(i) => write!(f, "transfer tip rack {i}"),
            LabwareRole::ReagentTips => write!(f, "reagent tip rack"),
            LabwareRole::ReagentReservoir => write!(f, "reagent reservoir"),
            LabwareRole::WaterReservoir => write!(f, "water reservoir"),
        }
    }
}

/// Where a piece of labware physically is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    OnDeck(SlotId),
    OffDeck,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::OnDeck(slot) => write!(f, "slot {slot}"),
            Placement::OffDeck => write!(f, "off-deck"),
        }
    }
}

// ============================================================================
// 3. LOCATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "site", rename_all = "snake_case")]
pub enum Site {
    /// Row-A well of a column; a multi-channel head addresses the whole column.
    Well { labware: LabwareRole, column: u8 },
    Trash,
}

/// Vertical reference inside a site. Lengths in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "anchor", rename_all = "snake_case")]
pub enum Anchor {
    /// The driver's own default for the command.
    Default,
    Top { z: f64 },
    Bottom { z: f64 },
    CenterOffset { x: f64, y: f64, z: f64 },
}

/// An immutable physical reference the driver can move to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub site: Site,
    pub anchor: Anchor,
}

impl Location {
    pub fn well(labware: LabwareRole, column: u8) -> Self {
        Self {
            site: Site::Well { labware, column },
            anchor: Anchor::Default,
        }
    }

    /// Reservoirs expose a single trough addressed as column 1.
    pub fn reservoir(labware: LabwareRole) -> Self {
        Self::well(labware, 1)
    }

    pub fn trash() -> Self {
        Self {
            site: Site::Trash,
            anchor: Anchor::Default,
        }
    }

    pub fn top(&self, z: f64) -> Self {
        self.anchored(Anchor::Top { z })
    }

    pub fn bottom(&self, z: f64) -> Self {
        self.anchored(Anchor::Bottom { z })
    }

    pub fn center_offset(&self, x: f64, y: f64, z: f64) -> Self {
        self.anchored(Anchor::CenterOffset { x, y, z })
    }

    pub fn labware(&self) -> Option<LabwareRole> {
        match self.site {
            Site::Well { labware, .. } => Some(labware),
            Site::Trash => None,
        }
    }

    fn anchored(&self, anchor: Anchor) -> Self {
        Self {
            site: self.site,
            anchor,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.site {
            Site::Well { labware, column } => write!(f, "{labware} A{column}")?,
            Site::Trash => write!(f, "trash")?,
        }
        match self.anchor {
            Anchor::Default => Ok(()),
            Anchor::Top { z } => write!(f, " top({z})"),
            Anchor::Bottom { z } => write!(f, " bottom({z})"),
            Anchor::CenterOffset { x, y, z } => write!(f, " center+({x}, {y}, {z})"),
        }
    }
}
