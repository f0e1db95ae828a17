// src/distribution.rs
//
// =============================================================================
// ROBOCTAB: DISTRIBUTION ENGINE
// =============================================================================
//
// One aspiration, many dispenses.
//
// Responsibilities:
// 1. Size batches so a single charge covers every destination in the batch.
// 2. Emit the aspirate / dispense / air-gap choreography for one reagent,
//    with a single tip for the whole call.
// 3. Express the five reagent phases as presets of one parameterised profile.

use crate::commands::{CommandStream, DeviceOp};
use crate::core::{LabwareRole, Location, Microliters};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

/// Gantry speed used for everything except repeated dispenses (mm/s).
pub const DEFAULT_SPEED: f64 = 400.0;
/// Speed for the second and later dispenses of a batch (mm/s).
pub const SLOW_DISPENSE_SPEED: f64 = 100.0;
/// Extra volume pushed on repeated dispenses to expel the preceding air gap.
pub const OVERFILL: f64 = 10.0;
/// Air drawn after every dispense to stop drips in transit.
pub const TRANSIT_AIR_GAP: f64 = 10.0;

// ============================================================================
// 1. PROFILES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReagentPhase {
    /// TE buffer added before grinding.
    Water,
    Extraction,
    Chloroform,
    Isopropanol,
    /// Elution buffer resuspending the DNA pellet.
    Elution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipDisposition {
    /// Seat the tip back in its rack for a later phase.
    Return,
    /// Discard the tip in the trash.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispenseAnchor {
    Top(f64),
    Bottom(f64),
}

impl DispenseAnchor {
    pub fn apply(self, well: &Location) -> Location {
        match self {
            DispenseAnchor::Top(z) => well.top(z),
            DispenseAnchor::Bottom(z) => well.bottom(z),
        }
    }
}

/// Water plug drawn ahead of a volatile reagent, once per tip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidCap {
    pub liquid: f64,
    pub air: f64,
    pub rate: f64,
}

impl LiquidCap {
    pub fn total(&self) -> f64 {
        self.liquid + self.air
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchTipSpec {
    pub v_offset: f64,
    pub radius: f64,
    pub speed: f64,
}

/// Everything that differs between reagent phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionProfile {
    /// Reagent aspirated per batch (uL).
    pub charge: f64,
    pub source_bottom: f64,
    pub aspirate_rate: f64,
    pub aspirate_speed: f64,
    /// Wait after aspirating viscous buffers (s).
    pub settle_seconds: Option<f64>,
    /// Air drawn above the source right after the charge.
    pub trailing_air: Option<f64>,
    pub dispense_anchor: DispenseAnchor,
    pub dispense_rate: f64,
    pub liquid_cap: Option<LiquidCap>,
    pub touch_tip: Option<TouchTipSpec>,
}

impl ReagentPhase {
    /// Aqueous phases draw a full tip; capped solvents draw what is left
    /// after the water cap and the trailing air.
    pub fn profile(self, capacity: f64) -> DistributionProfile {
        let aqueous = DistributionProfile {
            charge: capacity,
            source_bottom: 2.5,
            aspirate_rate: 1.0,
            aspirate_speed: DEFAULT_SPEED,
            settle_seconds: None,
            trailing_air: None,
            dispense_anchor: DispenseAnchor::Bottom(40.0),
            dispense_rate: 1.0,
            liquid_cap: None,
            touch_tip: None,
        };
        let solvent_cap = LiquidCap {
            liquid: 25.0,
            air: 25.0,
            rate: 4.0,
        };
        let solvent_charge = capacity - solvent_cap.total() - TRANSIT_AIR_GAP;

        match self {
            ReagentPhase::Water => aqueous,
            ReagentPhase::Extraction => DistributionProfile {
                source_bottom: 2.0,
                aspirate_rate: 0.85,
                settle_seconds: Some(1.5),
                dispense_anchor: DispenseAnchor::Top(2.0),
                dispense_rate: 2.0,
                ..aqueous
            },
            ReagentPhase::Chloroform => DistributionProfile {
                charge: solvent_charge,
                aspirate_rate: 4.0,
                aspirate_speed: 200.0,
                trailing_air: Some(TRANSIT_AIR_GAP),
                dispense_anchor: DispenseAnchor::Top(9.0),
                liquid_cap: Some(solvent_cap),
                ..aqueous
            },
            ReagentPhase::Isopropanol => DistributionProfile {
                charge: solvent_charge,
                settle_seconds: Some(1.0),
                trailing_air: Some(TRANSIT_AIR_GAP),
                dispense_anchor: DispenseAnchor::Top(10.0),
                liquid_cap: Some(solvent_cap),
                ..aqueous
            },
            ReagentPhase::Elution => DistributionProfile {
                source_bottom: 1.75,
                dispense_anchor: DispenseAnchor::Bottom(16.0),
                touch_tip: Some(TouchTipSpec {
                    v_offset: 0.1,
                    radius: 0.5,
                    speed: 60.0,
                }),
                ..aqueous
            },
        }
    }

    pub fn default_disposition(self) -> TipDisposition {
        match self {
            ReagentPhase::Water | ReagentPhase::Extraction => TipDisposition::Return,
            _ => TipDisposition::Drop,
        }
    }
}

// ============================================================================
// 2. BATCHING
// ============================================================================

/// `floor(budget / per_item_volume)`, rejecting anything that yields zero.
///
/// Volumes below the transit air gap are rejected: the gap drawn after each
/// dispense would outgrow what that dispense freed in the tip.
pub fn items_per_batch(per_item_volume: f64, capacity: f64, charge: f64) -> Result<usize> {
    if !per_item_volume.is_finite() || per_item_volume <= 0.0 {
        return Err(ProtocolError::config(format!(
            "per-item volume must be positive, got {per_item_volume}"
        )));
    }
    if per_item_volume < TRANSIT_AIR_GAP {
        return Err(ProtocolError::config(format!(
            "per-item volume {per_item_volume} uL is below the {TRANSIT_AIR_GAP} uL transit air gap"
        )));
    }
    if per_item_volume > capacity {
        return Err(ProtocolError::config(format!(
            "per-item volume {per_item_volume} uL exceeds pipette capacity {capacity} uL"
        )));
    }
    if !charge.is_finite() || charge <= 0.0 {
        return Err(ProtocolError::config(format!(
            "capacity {capacity} uL leaves no room for a reagent charge"
        )));
    }
    if charge > capacity {
        return Err(ProtocolError::config(format!(
            "reagent charge {charge} uL exceeds pipette capacity {capacity} uL"
        )));
    }
    let budget = capacity.min(charge);
    let count = (budget / per_item_volume).floor() as usize;
    if count == 0 {
        return Err(ProtocolError::config(format!(
            "per-item volume {per_item_volume} uL does not fit in a {budget} uL charge"
        )));
    }
    Ok(count)
}

/// Consecutive batches of `per_batch`, the last one holding the remainder.
pub fn plan_batches<T>(items: &[T], per_batch: usize) -> Vec<&[T]> {
    if per_batch == 0 {
        return Vec::new();
    }
    let full = items.len() / per_batch;
    let mut batches = Vec::with_capacity(full + 1);
    for i in 0..=full {
        let start = i * per_batch;
        let end = (start + per_batch).min(items.len());
        if start < end {
            batches.push(&items[start..end]);
        }
    }
    batches
}

// ============================================================================
// 3. THE ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct DistributionRequest<'a> {
    pub destinations: &'a [Location],
    pub per_item_volume: f64,
    pub capacity: f64,
    pub source: Location,
    pub profile: DistributionProfile,
    pub disposition: TipDisposition,
    /// Fixed rack position for the tip; `None` takes the next available one.
    pub tip: Option<Location>,
}

impl<'a> DistributionRequest<'a> {
    /// A request using the preset profile and tip policy of `phase`.
    pub fn for_phase(
        phase: ReagentPhase,
        destinations: &'a [Location],
        per_item_volume: f64,
        capacity: f64,
        source: Location,
    ) -> Self {
        Self {
            destinations,
            per_item_volume,
            capacity,
            source,
            profile: phase.profile(capacity),
            disposition: phase.default_disposition(),
            tip: None,
        }
    }

    pub fn with_dispense_anchor(mut self, anchor: DispenseAnchor) -> Self {
        self.profile.dispense_anchor = anchor;
        self
    }

    pub fn with_tip(mut self, tip: Location) -> Self {
        self.tip = Some(tip);
        self
    }
}

/// What a distribution call did, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistributionSummary {
    pub batch_sizes: Vec<usize>,
    pub tips_used: usize,
}

/// Plans one distribution as a standalone command list.
pub fn distribute(request: &DistributionRequest<'_>) -> Result<Vec<DeviceOp>> {
    let mut stream = CommandStream::new(Microliters(request.capacity));
    distribute_into(&mut stream, request)?;
    Ok(stream.into_ops())
}

/// Appends one distribution to an existing stream (no tip may be attached).
pub fn distribute_into(
    stream: &mut CommandStream,
    request: &DistributionRequest<'_>,
) -> Result<DistributionSummary> {
    let profile = &request.profile;
    let per_batch = items_per_batch(request.per_item_volume, request.capacity, profile.charge)?;

    if request.destinations.is_empty() {
        log::debug!("Distribution skipped: no destinations");
        return Ok(DistributionSummary::default());
    }

    let batches = plan_batches(request.destinations, per_batch);
    let source = request.source;

    stream.ensure_speed(DEFAULT_SPEED);
    stream.pick_up_tip(request.tip)?;

    if let Some(cap) = profile.liquid_cap {
        let water = Location::reservoir(LabwareRole::WaterReservoir);
        stream.aspirate(cap.liquid, water.bottom(2.5), cap.rate)?;
        stream.aspirate(cap.air, water.top(5.0), cap.rate)?;
    }

    for (index, batch) in batches.iter().enumerate() {
        log::debug!(
            "Batch {}/{}: {} destinations x {} uL",
            index + 1,
            batches.len(),
            batch.len(),
            request.per_item_volume
        );

        // The batch size is derived from the charge; re-check before drawing.
        let liquid_needed = batch.len() as f64 * request.per_item_volume;
        if liquid_needed > profile.charge + 1e-9 {
            return Err(ProtocolError::CapacityViolation {
                requested: liquid_needed,
                held: stream.held().0,
                capacity: profile.charge,
            });
        }

        stream.ensure_speed(profile.aspirate_speed);
        stream.aspirate(
            profile.charge,
            source.bottom(profile.source_bottom),
            profile.aspirate_rate,
        )?;
        if let Some(seconds) = profile.settle_seconds {
            stream.delay(seconds);
        }
        if let Some(air) = profile.trailing_air {
            stream.aspirate(air, source.top(2.5), profile.aspirate_rate)?;
        }

        for (position, well) in batch.iter().enumerate() {
            let volume = if position == 0 {
                stream.ensure_speed(DEFAULT_SPEED);
                request.per_item_volume + profile.trailing_air.unwrap_or(0.0)
            } else {
                stream.ensure_speed(SLOW_DISPENSE_SPEED);
                request.per_item_volume + OVERFILL
            };
            stream.dispense(
                volume,
                profile.dispense_anchor.apply(well),
                profile.dispense_rate,
            )?;
            if let Some(touch) = profile.touch_tip {
                stream.touch_tip(*well, touch.v_offset, touch.radius, touch.speed)?;
            }
            stream.air_gap(TRANSIT_AIR_GAP)?;
        }

        stream.ensure_speed(DEFAULT_SPEED);
        match profile.liquid_cap {
            // Keep the cap; send only the surplus back to the source.
            Some(cap) => {
                let surplus = stream.held().0 - cap.total();
                if surplus > 0.0 {
                    stream.dispense(surplus, source, 1.0)?;
                }
            }
            None => stream.blow_out(source)?,
        }
    }

    match request.disposition {
        TipDisposition::Return => stream.return_tip()?,
        TipDisposition::Drop => stream.drop_tip(None, true)?,
    }

    let summary = DistributionSummary {
        batch_sizes: batches.iter().map(|b| b.len()).collect(),
        tips_used: 1,
    };
    log::info!(
        "Distributed {} uL to {} columns in {} batches",
        request.per_item_volume,
        request.destinations.len(),
        summary.batch_sizes.len()
    );
    Ok(summary)
}
