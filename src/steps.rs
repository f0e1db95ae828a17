// src/steps.rs
//
// =============================================================================
// ROBOCTAB: PER-WELL HANDLING STEPS
// =============================================================================
//
// The phases that do not fit the one-charge-many-dispenses pattern: every
// column gets its own aspirations, and most of them reuse a tip parked at
// the matching column of a dedicated rack.
//
// All volumes go through `CommandStream`, so a step that would overfill a tip
// fails while the plan is still being built.

use crate::addressing::DestinationSet;
use crate::commands::CommandStream;
use crate::config::ChloroformMixing;
use crate::core::{LabwareRole, Location};
use crate::distribution::DEFAULT_SPEED;
use crate::error::Result;

fn reagent_source() -> Location {
    Location::reservoir(LabwareRole::ReagentReservoir)
}

fn water_source() -> Location {
    Location::reservoir(LabwareRole::WaterReservoir)
}

/// Speed used while seating a tip back into its rack (mm/s).
const RACK_SPEED: f64 = 200.0;

// ============================================================================
// 1. EXTRACTION BUFFER
// ============================================================================

/// Two 200 uL shots of viscous buffer per column, sucking back the drip
/// that forms on the tip and returning it to the reservoir.
pub fn extraction_buffer(stream: &mut CommandStream, samples: &DestinationSet) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }
    let source = reagent_source();
    stream.ensure_speed(DEFAULT_SPEED);
    stream.pick_up_tip(None)?;
    for d in samples.iter() {
        let well = d.location;
        for _ in 0..2 {
            stream.aspirate(200.0, source.bottom(2.0), 0.85)?;
            stream.delay(1.5);
            stream.air_gap(40.0)?;
            stream.dispense(240.0, well.top(2.0), 2.0)?;
            stream.aspirate(20.0, well.top(2.0), 1.0)?;
            stream.dispense(20.0, source.top(0.0), 1.0)?;
        }
    }
    stream.return_tip()?;
    log::info!("Extraction buffer added to {} columns", samples.len());
    Ok(())
}

// ============================================================================
// 2. CHLOROFORM
// ============================================================================

pub fn chloroform(
    stream: &mut CommandStream,
    mode: ChloroformMixing,
    samples: &DestinationSet,
    interstice: f64,
) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }
    match mode {
        ChloroformMixing::PipetteMixing => chloroform_pipette_mixing(stream, samples, interstice)?,
        ChloroformMixing::BubbleMixing => chloroform_bubble_mixing(stream, samples, interstice)?,
        ChloroformMixing::NoMixing => chloroform_no_mixing(stream, samples)?,
    }
    log::info!(
        "Chloroform added to {} columns ({:?})",
        samples.len(),
        mode
    );
    Ok(())
}

/// Water plug plus air slug: keeps the volatile solvent from dripping.
fn draw_liquid_cap(stream: &mut CommandStream) -> Result<()> {
    let water = water_source();
    stream.aspirate(40.0, water.bottom(2.5), 4.0)?;
    stream.aspirate(55.0, water.top(5.0), 4.0)
}

fn chloroform_pipette_mixing(
    stream: &mut CommandStream,
    samples: &DestinationSet,
    interstice: f64,
) -> Result<()> {
    let source = reagent_source();
    for d in samples.iter() {
        let well = d.location;
        let tip = d.sibling(LabwareRole::MixingTips(d.plate));
        let upper = well.bottom(interstice + 6.0);
        let lower = well.bottom(interstice - 7.0);

        stream.ensure_speed(DEFAULT_SPEED);
        stream.pick_up_tip(Some(tip))?;
        draw_liquid_cap(stream)?;

        stream.aspirate(200.0, source.bottom(2.5), 2.0)?;
        stream.aspirate(5.0, source.top(2.5), 1.0)?;
        stream.dispense(195.0, well.top(9.0), 1.0)?;

        stream.aspirate(193.0, source.bottom(2.5), 2.0)?;
        stream.aspirate(2.0, source.top(2.5), 1.0)?;
        stream.dispense(195.0, upper, 1.0)?;

        stream.aspirate(130.0, lower, 0.7)?;
        stream.ensure_speed(DEFAULT_SPEED);
        for _ in 0..5 {
            stream.dispense(130.0, upper, 2.0)?;
            stream.aspirate(130.0, lower, 0.7)?;
        }
        stream.dispense(130.0, upper, 2.0)?;

        stream.touch_tip(well, -3.0, 1.2, 40.0)?;
        stream.set_speed(RACK_SPEED);
        stream.drop_tip(Some(tip), false)?;
        stream.set_speed(DEFAULT_SPEED);
    }
    Ok(())
}

fn chloroform_bubble_mixing(
    stream: &mut CommandStream,
    samples: &DestinationSet,
    interstice: f64,
) -> Result<()> {
    let source = reagent_source();
    for d in samples.iter() {
        let well = d.location;
        let tip = d.sibling(LabwareRole::MixingTips(d.plate));
        let under = well.bottom(interstice - 2.0);

        stream.ensure_speed(DEFAULT_SPEED);
        stream.pick_up_tip(Some(tip))?;
        draw_liquid_cap(stream)?;

        stream.aspirate(200.0, source.bottom(2.5), 4.0)?;
        stream.aspirate(5.0, source.top(2.5), 1.0)?;
        stream.dispense(205.0, well.top(9.0), 1.0)?;

        stream.aspirate(200.0, source.bottom(2.5), 4.0)?;
        stream.aspirate(5.0, source.top(2.5), 1.0)?;
        stream.dispense(205.0, under, 1.0)?;

        // Air drawn at the rim, pushed out under the interface.
        stream.aspirate(205.0, well.top(0.0), 4.0)?;
        stream.ensure_speed(DEFAULT_SPEED);
        for _ in 0..10 {
            stream.dispense(160.0, under, 1.0)?;
            stream.aspirate(160.0, well.top(0.0), 4.0)?;
        }
        stream.dispense(180.0, under, 1.0)?;

        stream.touch_tip(well, -3.0, 1.2, 40.0)?;
        stream.set_speed(RACK_SPEED);
        stream.drop_tip(Some(tip), false)?;
        stream.set_speed(DEFAULT_SPEED);
    }
    Ok(())
}

fn chloroform_no_mixing(stream: &mut CommandStream, samples: &DestinationSet) -> Result<()> {
    let source = reagent_source();
    stream.ensure_speed(DEFAULT_SPEED);
    stream.pick_up_tip(None)?;
    draw_liquid_cap(stream)?;
    for d in samples.iter() {
        for _ in 0..2 {
            stream.aspirate(200.0, source.bottom(2.5), 4.0)?;
            stream.aspirate(5.0, source.top(2.5), 1.0)?;
            stream.dispense(205.0, d.location.top(9.0), 1.0)?;
        }
    }
    stream.drop_tip(None, true)
}

// ============================================================================
// 3. SUPERNATANT TRANSFER
// ============================================================================

/// Moves the aqueous phase of each sample column to the same column of its
/// final plate, staying above the chloroform interface.
pub fn supernatant_transfer(
    stream: &mut CommandStream,
    samples: &DestinationSet,
    interstice: f64,
) -> Result<()> {
    for d in samples.iter() {
        let source = d.location;
        let target = d.sibling(LabwareRole::FinalPlate(d.plate));
        let tip = d.sibling(LabwareRole::TransferTips(d.plate));

        stream.ensure_speed(DEFAULT_SPEED);
        stream.pick_up_tip(Some(tip))?;

        for (depth, approach, volume, aspirate_rate, dispense_rate) in [
            (interstice + 3.25, 15.0, 290.0, 0.6, 1.0),
            (interstice + 2.5, 7.0, 85.0, 0.2, 2.5),
        ] {
            stream.move_to(source.top(-16.0), Some(400.0));
            stream.move_to(source.bottom(depth), Some(approach));
            stream.aspirate(volume, source.bottom(depth), aspirate_rate)?;
            stream.air_gap(10.0)?;

            stream.set_speed(RACK_SPEED);
            stream.dispense(volume + 10.0, target.top(1.0), dispense_rate)?;
            stream.blow_out(target.top(-1.0))?;
            stream.touch_tip(target, -3.0, 1.2, 40.0)?;
        }

        stream.set_speed(DEFAULT_SPEED);
        stream.drop_tip(Some(tip), false)?;
    }
    if !samples.is_empty() {
        log::info!("Supernatant transferred for {} columns", samples.len());
    }
    Ok(())
}

// ============================================================================
// 4. ALCOHOL WASHES
// ============================================================================

/// 295 uL isopropanol per final column with the reagent rack's A1 tip.
pub fn isopropanol_dispense(stream: &mut CommandStream, finals: &DestinationSet) -> Result<()> {
    if finals.is_empty() {
        return Ok(());
    }
    let source = reagent_source();
    stream.pick_up_tip(Some(Location::well(LabwareRole::ReagentTips, 1)))?;
    stream.ensure_speed(DEFAULT_SPEED);
    for d in finals.iter() {
        let well = d.location;
        stream.aspirate(295.0, source.bottom(2.5), 1.0)?;
        stream.air_gap(5.0)?;
        stream.dispense(300.0, well.top(10.0), 1.0)?;
        stream.aspirate(10.0, well.top(10.0), 1.0)?;
        stream.dispense(10.0, source.top(4.0), 1.0)?;
    }
    stream.drop_tip(None, true)?;
    log::info!("Isopropanol added to {} columns", finals.len());
    Ok(())
}

/// 70% ethanol run down the side wall so the pellet stays put.
pub fn ethanol_dispense(stream: &mut CommandStream, finals: &DestinationSet) -> Result<()> {
    if finals.is_empty() {
        return Ok(());
    }
    let source = reagent_source();
    stream.ensure_speed(DEFAULT_SPEED);
    stream.pick_up_tip(Some(Location::well(LabwareRole::ReagentTips, 2)))?;
    for d in finals.iter() {
        let well = d.location;
        stream.aspirate(295.0, source.bottom(2.5), 1.5)?;
        stream.air_gap(5.0)?;
        stream.dispense(300.0, well.center_offset(1.25, 0.0, 22.0), 0.8)?;
        stream.blow_out(well.top(4.0))?;
    }
    stream.drop_tip(None, true)?;
    log::info!("Ethanol added to {} columns", finals.len());
    Ok(())
}

/// Shakes residual drops off a reused tip against the rack walls.
fn wall_blow_outs(stream: &mut CommandStream, rack_well: Location, z: f64) -> Result<()> {
    stream.blow_out(rack_well.top(-8.0))?;
    for (x, y) in [(1.0, 4.0), (1.0, -4.0), (4.0, 1.0), (-4.0, 1.0), (0.0, 0.0)] {
        stream.blow_out(rack_well.center_offset(x, y, z))?;
    }
    Ok(())
}

/// Removes the isopropanol in three stages, going deeper each time.
pub fn isopropanol_pipette_off(stream: &mut CommandStream, finals: &DestinationSet) -> Result<()> {
    let trash = Location::trash();
    for d in finals.iter() {
        let well = d.location;
        let tip = d.sibling(LabwareRole::TransferTips(d.plate));

        stream.ensure_speed(DEFAULT_SPEED);
        stream.pick_up_tip(Some(tip))?;
        wall_blow_outs(stream, tip, 21.5)?;

        stream.aspirate(295.0, well.bottom(8.0), 0.7)?;
        stream.air_gap(5.0)?;
        stream.dispense(300.0, trash, 2.0)?;
        stream.air_gap(5.0)?;

        stream.move_to(well.bottom(14.0), None);
        stream.dispense(5.0, well.bottom(14.0), 1.0)?;
        stream.move_to(well.bottom(4.0), Some(30.0));
        stream.aspirate(295.0, well.bottom(4.0), 0.4)?;
        stream.dispense(300.0, trash, 2.0)?;
        stream.air_gap(5.0)?;

        // Last drops stay in the tip, which goes back to its rack.
        stream.move_to(well.bottom(11.0), None);
        stream.dispense(5.0, well.bottom(11.0), 1.0)?;
        stream.move_to(well.bottom(1.75), Some(30.0));
        stream.aspirate(70.0, well.bottom(1.75), 0.1)?;
        stream.air_gap(5.0)?;

        stream.ensure_speed(DEFAULT_SPEED);
        stream.drop_tip(Some(tip), false)?;
    }
    if !finals.is_empty() {
        log::info!("Isopropanol pipetted off {} columns", finals.len());
    }
    Ok(())
}

pub fn ethanol_pipette_off(stream: &mut CommandStream, finals: &DestinationSet) -> Result<()> {
    for d in finals.iter() {
        let well = d.location;
        let tip = d.sibling(LabwareRole::TransferTips(d.plate));

        stream.pick_up_tip(Some(tip))?;
        stream.move_to(tip.top(0.0), None);
        wall_blow_outs(stream, tip, 21.0)?;

        stream.aspirate(200.0, well.bottom(5.0), 0.7)?;
        stream.move_to(well.bottom(3.0), Some(20.0));
        stream.aspirate(60.0, well.bottom(3.0), 0.2)?;
        stream.move_to(well.bottom(2.0), Some(10.0));
        stream.aspirate(35.0, well.bottom(2.0), 0.1)?;
        stream.air_gap(5.0)?;

        stream.drop_tip(Some(tip), false)?;
    }
    if !finals.is_empty() {
        log::info!("Ethanol pipetted off {} columns", finals.len());
    }
    Ok(())
}
