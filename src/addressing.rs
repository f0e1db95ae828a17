// src/addressing.rs
//
// =============================================================================
// ROBOCTAB: PLATE / COLUMN ADDRESSING
// =============================================================================
//
// Turns per-plate column ranges into ordered Destination Sets.
//
// The pipette is an 8-channel head, so a single row-A well addresses a whole
// column. A range whose first column is 0 switches the plate off; it then
// contributes nothing to any set, requirement or batch.

use crate::core::{LabwareRole, Location, MAX_PLATES, PLATE_COLUMNS};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// 1. COLUMN RANGES
// ============================================================================

/// Inclusive 1-based column range. `first == 0` marks an unused plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRange {
    pub first: u8,
    pub last: u8,
}

impl ColumnRange {
    pub const FULL: ColumnRange = ColumnRange {
        first: 1,
        last: PLATE_COLUMNS,
    };
    pub const UNUSED: ColumnRange = ColumnRange { first: 0, last: 0 };

    pub fn new(first: u8, last: u8) -> Self {
        Self { first, last }
    }

    pub fn is_active(&self) -> bool {
        self.first != 0
    }

    pub fn validate(&self, plate: usize) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        if self.last < self.first {
            return Err(ProtocolError::config(format!(
                "plate {plate}: last column {} is before first column {}",
                self.last, self.first
            )));
        }
        if self.last > PLATE_COLUMNS {
            return Err(ProtocolError::config(format!(
                "plate {plate}: last column {} is beyond the {PLATE_COLUMNS} columns of the plate",
                self.last
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        if self.is_active() && self.last >= self.first {
            usize::from(self.last - self.first + 1)
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> impl Iterator<Item = u8> {
        let (start, end) = if self.is_empty() {
            (1, 0)
        } else {
            (self.first, self.last)
        };
        start..=end
    }
}

impl Default for ColumnRange {
    fn default() -> Self {
        Self::FULL
    }
}

/// Number of plates in use, checking that they form a prefix 1..n.
pub fn active_plate_count(ranges: &[ColumnRange]) -> Result<usize> {
    if ranges.len() > MAX_PLATES {
        return Err(ProtocolError::config(format!(
            "{} plates configured, at most {MAX_PLATES} are supported",
            ranges.len()
        )));
    }
    let count = ranges.iter().take_while(|r| r.is_active()).count();
    if let Some(gap) = ranges[count..].iter().position(|r| r.is_active()) {
        return Err(ProtocolError::config(format!(
            "plate {} is active but plate {} is not; fill plates in order",
            count + gap + 1,
            count + 1
        )));
    }
    if count == 0 {
        return Err(ProtocolError::config("no plate has samples (plate 1 first column is 0)"));
    }
    Ok(count)
}

// ============================================================================
// 2. DESTINATION SETS
// ============================================================================

/// One addressed column, remembering which plate (1-based) it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Destination {
    pub plate: u8,
    pub column: u8,
    pub location: Location,
}

impl Destination {
    /// The same column on another labware (tip rack, final plate).
    pub fn sibling(&self, labware: LabwareRole) -> Location {
        Location::well(labware, self.column)
    }
}

/// Ordered destinations; the order is the dispense order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationSet {
    items: Vec<Destination>,
}

impl DestinationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the columns of one plate-like labware.
    pub fn for_plate(plate: u8, labware: LabwareRole, range: ColumnRange) -> Self {
        let items = range
            .columns()
            .map(|column| Destination {
                plate,
                column,
                location: Location::well(labware, column),
            })
            .collect();
        Self { items }
    }

    /// Concatenates every active plate, using `labware_for` to pick the
    /// labware (sample plate, final plate, tip rack) serving each plate index.
    pub fn across_plates(
        ranges: &[ColumnRange],
        labware_for: impl Fn(u8) -> LabwareRole,
    ) -> Self {
        let mut set = Self::new();
        for (i, range) in ranges.iter().enumerate() {
            let plate = (i + 1) as u8;
            set.extend(Self::for_plate(plate, labware_for(plate), *range));
        }
        set
    }

    pub fn extend(&mut self, other: DestinationSet) {
        self.items.extend(other.items);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.items.iter()
    }

    pub fn locations(&self) -> Vec<Location> {
        self.items.iter().map(|d| d.location).collect()
    }

    /// Keeps only the destinations of the given plates, in set order.
    pub fn filter_plates(&self, plates: &[u8]) -> Self {
        Self {
            items: self
                .items
                .iter()
                .filter(|d| plates.contains(&d.plate))
                .copied()
                .collect(),
        }
    }
}
