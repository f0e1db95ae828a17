// src/protocol.rs
//
// =============================================================================
// ROBOCTAB: PROTOCOL SEQUENCER
// =============================================================================
//
// Builds the complete command list for a run before anything moves.
//
// Responsibilities:
// 1. Pick the deck topology once, from the number of active plates.
// 2. Lay out the timeline: reagent phases, operator barriers, deck changes.
// 3. Audit the finished plan: every touched labware is on the deck at the
//    moment it is touched, and the slot mapping stays injective.

use crate::addressing::{ColumnRange, DestinationSet};
use crate::commands::{CommandStream, DeviceOp};
use crate::config::{ChloroformMixing, ProtocolConfig};
use crate::core::{LabwareKind, LabwareRole, Location, Microliters, Placement, SlotId};
use crate::deck::{Deck, Relocation, Requirement};
use crate::distribution::{
    distribute, distribute_into, DispenseAnchor, DistributionRequest, ReagentPhase,
};
use crate::error::{ProtocolError, Result};
use crate::reagents::{ReagentRecipe, TimedStep};
use crate::steps;
use crate::topology::{DeckTopology, Stage};
use serde::Serialize;

// ============================================================================
// 1. THE PLAN
// ============================================================================

/// Deck changes made at one checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointRecord {
    pub stage: Stage,
    pub relocations: Vec<Relocation>,
}

/// A fully validated run, ready for a driver.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolPlan {
    pub plate_count: usize,
    pub columns: usize,
    /// SHA-256 of the configuration that produced the plan.
    pub fingerprint: String,
    pub checkpoints: Vec<CheckpointRecord>,
    pub ops: Vec<DeviceOp>,
}

impl ProtocolPlan {
    pub fn pause_count(&self) -> usize {
        self.ops.iter().filter(|op| op.is_pause()).count()
    }
}

/// "1, 2, 3 & 7"
fn slot_list(slots: &[SlotId]) -> String {
    let names: Vec<String> = slots.iter().map(|s| s.to_string()).collect();
    match names.split_last() {
        None => String::new(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} & {}", rest.join(", "), last),
    }
}

fn slots_of(deck: &Deck, keep: impl Fn(LabwareRole) -> bool) -> String {
    let slots: Vec<SlotId> = deck
        .occupied()
        .filter(|(_, role)| keep(*role))
        .map(|(slot, _)| slot)
        .collect();
    slot_list(&slots)
}

fn slot_of(deck: &Deck, role: LabwareRole) -> String {
    match deck.placement(role) {
        Some(Placement::OnDeck(slot)) => slot.to_string(),
        _ => "?".into(),
    }
}

// ============================================================================
// 2. THE SEQUENCER
// ============================================================================

struct Sequencer<'a> {
    config: &'a ProtocolConfig,
    topology: DeckTopology,
    deck: Deck,
    stream: CommandStream,
    checkpoints: Vec<CheckpointRecord>,
}

impl<'a> Sequencer<'a> {
    fn samples_slots(&self) -> String {
        slots_of(&self.deck, |r| r.kind() == LabwareKind::SamplePlate)
    }

    fn finals_slots(&self) -> String {
        slots_of(&self.deck, |r| r.kind() == LabwareKind::FinalPlate)
    }

    fn reservoir_slot(&self) -> String {
        slot_of(&self.deck, LabwareRole::ReagentReservoir)
    }

    fn water_slot(&self) -> String {
        slot_of(&self.deck, LabwareRole::WaterReservoir)
    }

    /// Reconciles the deck for `stage` and emits the operator barrier and moves.
    fn checkpoint(&mut self, stage: Stage) -> Result<()> {
        let required: Vec<Requirement> = self.topology.requirements(stage).to_vec();
        if required.is_empty() {
            return Ok(());
        }
        let relocations = self.deck.reconcile(&required, &Deck::usable_slots())?;
        if !relocations.is_empty() {
            let steps: Vec<String> = relocations.iter().map(|r| r.to_string()).collect();
            self.stream
                .pause(format!("Deck change {stage}: {}", steps.join("; ")));
            for r in &relocations {
                self.stream.move_labware(r.labware, r.from, r.to);
            }
        }
        log::info!(
            "Checkpoint '{}': {} relocation(s)",
            stage,
            relocations.len()
        );
        self.checkpoints.push(CheckpointRecord {
            stage,
            relocations,
        });
        Ok(())
    }

    fn load_labware(&mut self) {
        for (role, placement) in self.topology.initial().to_vec() {
            let name = self.config.labware.load_name(role).to_string();
            self.stream.load_labware(role, name, placement);
        }
    }

    fn build(mut self) -> Result<(Vec<DeviceOp>, Vec<CheckpointRecord>)> {
        let config = self.config;
        let ranges: Vec<ColumnRange> = config.active_ranges()?.to_vec();
        let columns = config.total_columns();
        let mixing = config.chloroform_mixing;
        let recipe = ReagentRecipe::for_columns(columns);

        let samples = DestinationSet::across_plates(&ranges, LabwareRole::SamplePlate);
        let finals = DestinationSet::across_plates(&ranges, LabwareRole::FinalPlate);
        let sample_wells = samples.locations();
        let final_wells = finals.locations();

        self.load_labware();

        // --- Preparation & TE buffer ---
        self.stream.pause(recipe.lysis_instructions());
        self.stream.pause(recipe.solvent_instructions());
        self.stream.pause("Place full isopropanol reservoir at -20C");
        self.stream.pause(
            "Centrifuge the samples plates for 30s, then remove sealing tape and add metallic beads",
        );
        let tip_slots = slots_of(&self.deck, |r| r.kind() == LabwareKind::TipRack);
        self.stream.pause(format!(
            "Place samples plates on slots {} ---- tip racks on slots {} ---- TE buffer reservoir on slot {}",
            self.samples_slots(),
            tip_slots,
            self.water_slot()
        ));
        self.stream.pause(format!(
            "START TE buffer dispensing to samples on slots {}",
            self.samples_slots()
        ));

        let water = DistributionRequest::for_phase(
            ReagentPhase::Water,
            &sample_wells,
            config.water_volume,
            config.capacity,
            Location::reservoir(LabwareRole::WaterReservoir),
        )
        .with_dispense_anchor(DispenseAnchor::Bottom(config.water_dispense_height));
        distribute_into(&mut self.stream, &water)?;

        // --- Grinding & extraction buffer ---
        self.stream.pause("Grind samples on a tissue-lyser machine");
        self.stream
            .pause("After grinding, centrifuge the plates for 30s then remove sealing tape");
        self.stream.pause(format!(
            "Place the samples plates back on slots {}. Add RNase to the extraction buffer and place it in the reservoir on slot {}",
            self.samples_slots(),
            self.reservoir_slot()
        ));
        self.stream
            .pause("START post-grinding extraction buffer dispensing");
        steps::extraction_buffer(&mut self.stream, &samples)?;

        // --- Chloroform ---
        self.stream.pause(
            "Seal plates with sealing tape and invert plates 10 times. Spin plates then remove sealing tape and incubate the plates (65C, 60 min)",
        );
        self.stream.pause(format!(
            "After incubation, place the samples plates back on slots {}, the chloroform reservoir on slot {} and the water reservoir on slot {}",
            self.samples_slots(),
            self.reservoir_slot(),
            self.water_slot()
        ));
        self.stream.pause(format!(
            "START chloroform dispensing to samples (~{} minutes)",
            TimedStep::Chloroform(mixing).minutes(columns)
        ));
        steps::chloroform(&mut self.stream, mixing, &samples, config.interstice_height)?;

        if mixing == ChloroformMixing::NoMixing {
            self.stream
                .pause("Mix (vortex carefully) then centrifuge the plates (6000rpm, 10 min)");
        } else {
            self.stream.pause("Centrifuge the plates (6000rpm, 10 min)");
            // Without a deck change the operator cleans the racks in place.
            if self.topology.requirements(Stage::AfterChloroform).is_empty() {
                let mixing_slots =
                    slots_of(&self.deck, |r| matches!(r, LabwareRole::MixingTips(_)));
                self.stream.pause(format!(
                    "Remove chloroform contaminated tip racks on slots {mixing_slots} (dispose tips, clean tip racks)"
                ));
            }
        }
        self.checkpoint(Stage::AfterChloroform)?;

        // --- Supernatant ---
        self.stream.pause(format!(
            "When centrifugation is done place the samples plates back on slots {} and empty labelled final plates on slots {}",
            self.samples_slots(),
            self.finals_slots()
        ));
        let groups = self.topology.transfer_groups().to_vec();
        for (index, group) in groups.iter().enumerate() {
            let subset = samples.filter_plates(group);
            self.stream.pause(format!(
                "START supernatant transfer (~{} minutes)",
                TimedStep::SupernatantTransfer.minutes(subset.len())
            ));
            steps::supernatant_transfer(&mut self.stream, &subset, config.interstice_height)?;
            if index + 1 < groups.len() {
                self.checkpoint(Stage::AfterTransferGroup(index))?;
            }
        }
        self.checkpoint(Stage::AfterSupernatant)?;

        // --- Isopropanol ---
        let finals_slots = self.finals_slots();
        self.stream.pause(format!(
            "Replace the chloroform reservoir on slot {} with the cold isopropanol reservoir",
            self.reservoir_slot()
        ));
        self.stream.pause(format!(
            "START isopropanol dispensing to plates on slots {finals_slots}"
        ));
        steps::isopropanol_dispense(&mut self.stream, &finals)?;
        self.stream.pause(format!(
            "At this point the plates (slots {finals_slots}) can be sealed and stored at -20C and the extraction completed later"
        ));
        self.stream.pause(format!(
            "Seal and invert 20x the plates on slots {finals_slots} then centrifuge (10min, 6000 rpm)"
        ));
        if config.pipette_off_isopropanol {
            self.stream.pause(format!(
                "When centrifugation is done, place the plates back on slots {finals_slots}"
            ));
            self.stream.pause(format!(
                "START isopropanol discarding (~{} minutes)",
                TimedStep::IsopropanolPipetteOff.minutes(columns)
            ));
            steps::isopropanol_pipette_off(&mut self.stream, &finals)?;
        } else {
            self.stream.pause(
                "Gently invert the plates to pour off the supernatant then centrifuge the plates 10s",
            );
            self.stream
                .pause(format!("Place plates back on slots {finals_slots}"));
        }

        // --- Ethanol ---
        self.stream.pause(format!(
            "Replace the isopropanol reservoir on slot {} with the 70% ethanol reservoir",
            self.reservoir_slot()
        ));
        self.stream.pause(format!(
            "START ethanol dispensing to plates on slots {finals_slots}"
        ));
        steps::ethanol_dispense(&mut self.stream, &finals)?;
        self.stream
            .pause("Centrifuge the plates for 10 minutes at 6000 rpm");
        if config.pipette_off_ethanol {
            self.stream.pause(format!(
                "When centrifugation is done, place the plates back on slots {finals_slots}"
            ));
            self.stream.pause(format!(
                "START ethanol discarding (~{} minutes)",
                TimedStep::EthanolPipetteOff.minutes(columns)
            ));
            steps::ethanol_pipette_off(&mut self.stream, &finals)?;
        } else {
            self.stream.pause(
                "Gently invert the plates to pour off the supernatant then centrifuge the plates (6000rpm, 10sec)",
            );
        }

        // --- Elution ---
        let transfer_slots = slots_of(&self.deck, |r| matches!(r, LabwareRole::TransferTips(_)));
        self.stream.pause(format!(
            "Evaporate ethanol (20min, 45C). Remove and clean tip racks on slots {transfer_slots} (place tips in trash)"
        ));
        self.stream.pause(format!(
            "Prepare for elution buffer dispensing: replace the ethanol reservoir on slot {} with the elution buffer",
            self.reservoir_slot()
        ));
        self.stream.pause(format!(
            "When evaporation is done, place plates back on slots {finals_slots}"
        ));
        self.stream.pause("START elution buffer dispensing");

        let elution = DistributionRequest::for_phase(
            ReagentPhase::Elution,
            &final_wells,
            config.elution_buffer_volume,
            config.capacity,
            Location::reservoir(LabwareRole::ReagentReservoir),
        )
        .with_tip(Location::well(LabwareRole::ReagentTips, 3));
        distribute_into(&mut self.stream, &elution)?;

        self.stream.pause(
            "Centrifuge plates at 4000rpm 5s. Seal plates with tape and store plates at 4C. DNA extraction completed",
        );
        self.stream.comment("Protocol complete");

        if self.stream.has_tip() {
            return Err(ProtocolError::TipState(
                "plan ends with a tip still attached".into(),
            ));
        }
        Ok((self.stream.into_ops(), self.checkpoints))
    }
}

/// Builds and audits the full run. Nothing here talks to hardware.
pub fn plan(config: &ProtocolConfig) -> Result<ProtocolPlan> {
    config.validate()?;
    let plate_count = config.plate_count()?;
    if plate_count < config.plates.len() {
        log::warn!(
            "{} plate position(s) switched off; running {} plate(s)",
            config.plates.len() - plate_count,
            plate_count
        );
    }
    let topology = DeckTopology::for_plates(plate_count)?;
    let deck = topology.initial_deck()?;
    log::info!(
        "Planning {} plate(s), {} column(s), chloroform {:?}",
        plate_count,
        config.total_columns(),
        config.chloroform_mixing
    );

    let sequencer = Sequencer {
        config,
        topology,
        deck,
        stream: CommandStream::new(Microliters(config.capacity)),
        checkpoints: Vec::new(),
    };
    let (ops, checkpoints) = sequencer.build()?;
    audit_plan(&ops)?;

    let plan = ProtocolPlan {
        plate_count,
        columns: config.total_columns(),
        fingerprint: config.fingerprint()?,
        checkpoints,
        ops,
    };
    log::info!(
        "Plan ready: {} commands, {} operator pauses",
        plan.ops.len(),
        plan.pause_count()
    );
    Ok(plan)
}

/// Plans one stand-alone distribution of a reagent preset onto one plate.
///
/// Aqueous and chloroform presets target the samples plate, isopropanol and
/// elution buffer the final plate.
pub fn single_distribution(
    phase: ReagentPhase,
    plate: u8,
    range: ColumnRange,
    volume: f64,
    capacity: f64,
) -> Result<Vec<DeviceOp>> {
    range.validate(usize::from(plate))?;
    let labware = match phase {
        ReagentPhase::Water | ReagentPhase::Extraction | ReagentPhase::Chloroform => {
            LabwareRole::SamplePlate(plate)
        }
        ReagentPhase::Isopropanol | ReagentPhase::Elution => LabwareRole::FinalPlate(plate),
    };
    let source = match phase {
        ReagentPhase::Water => LabwareRole::WaterReservoir,
        _ => LabwareRole::ReagentReservoir,
    };
    let destinations = DestinationSet::for_plate(plate, labware, range).locations();
    let mut request = DistributionRequest::for_phase(
        phase,
        &destinations,
        volume,
        capacity,
        Location::reservoir(source),
    );
    match phase {
        ReagentPhase::Isopropanol => {
            request = request.with_tip(Location::well(LabwareRole::ReagentTips, 1));
        }
        ReagentPhase::Elution => {
            request = request.with_tip(Location::well(LabwareRole::ReagentTips, 3));
        }
        _ => {}
    }
    distribute(&request)
}

// ============================================================================
// 3. THE AUDIT
// ============================================================================

/// Replays the plan's labware loads and moves against a deck ledger and
/// checks every located command against it.
pub fn audit_plan(ops: &[DeviceOp]) -> Result<()> {
    let mut deck = Deck::new();
    for (step, op) in ops.iter().enumerate() {
        match op {
            DeviceOp::LoadLabware {
                labware, placement, ..
            } => {
                deck.declare(*labware)?;
                deck.load(*labware, *placement)?;
            }
            DeviceOp::MoveLabware { labware, from, to } => {
                if deck.placement(*labware) != Some(*from) {
                    return Err(ProtocolError::IllegalTransition {
                        labware: *labware,
                        detail: format!("command {step} moves it from {from}, but it is elsewhere"),
                    });
                }
                let requirement = match to {
                    Placement::OnDeck(slot) => Requirement::on_deck(*labware, slot.0),
                    Placement::OffDeck => Requirement::off_deck(*labware),
                };
                deck.reconcile(&[requirement], &Deck::usable_slots())?;
            }
            other => {
                if let Some(labware) = other.location().and_then(|l| l.labware()) {
                    if !deck.is_on_deck(labware) {
                        return Err(ProtocolError::NotOnDeck { labware, step });
                    }
                }
            }
        }
        if !deck.is_injective() {
            return Err(ProtocolError::SlotConflict {
                slot: SlotId::TRASH,
                detail: format!("slot mapping not injective after command {step}"),
            });
        }
    }
    Ok(())
}
