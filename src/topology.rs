// src/topology.rs
//
// =============================================================================
// ROBOCTAB: DECK TOPOLOGIES
// =============================================================================
//
// Static layout tables, one per plate count. The slot numbers are fixed by
// the protocol author; nothing here is computed.
//
// A topology answers three questions:
// 1. Which labware exists and where it starts.
// 2. What the deck must look like at each checkpoint.
// 3. How the supernatant transfer is grouped when transfer racks cannot all
//    be on the deck at once.

use crate::core::{LabwareRole, Placement, SlotId, MAX_PLATES};
use crate::deck::{Deck, Requirement};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol points where the deck is reconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Chloroform added and mixed; the mixing tips are contaminated.
    AfterChloroform,
    /// A supernatant group other than the last one is done (0-based).
    AfterTransferGroup(usize),
    /// Every supernatant has reached the final plates.
    AfterSupernatant,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::AfterChloroform => write!(f, "after chloroform"),
            Stage::AfterTransferGroup(i) => write!(f, "after supernatant group {}", i + 1),
            Stage::AfterSupernatant => write!(f, "after supernatant transfer"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub stage: Stage,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone)]
pub struct DeckTopology {
    initial: Vec<(LabwareRole, Placement)>,
    checkpoints: Vec<Checkpoint>,
    transfer_groups: Vec<Vec<u8>>,
}

fn on(slot: u8) -> Placement {
    Placement::OnDeck(SlotId(slot))
}

impl DeckTopology {
    /// Selects the layout for `plates` sample plates (1 to 4).
    pub fn for_plates(plates: usize) -> Result<Self> {
        use LabwareRole::*;

        let topology = match plates {
            1 => Self {
                initial: vec![
                    (SamplePlate(1), on(1)),
                    (FinalPlate(1), on(4)),
                    (MixingTips(1), on(2)),
                    (TransferTips(1), on(7)),
                    (ReagentTips, on(5)),
                    (ReagentReservoir, on(3)),
                    (WaterReservoir, on(6)),
                ],
                checkpoints: Vec::new(),
                transfer_groups: vec![vec![1]],
            },
            2 => Self {
                initial: vec![
                    (SamplePlate(1), on(1)),
                    (SamplePlate(2), on(2)),
                    (FinalPlate(1), on(4)),
                    (FinalPlate(2), on(5)),
                    (MixingTips(1), on(6)),
                    (MixingTips(2), on(9)),
                    (TransferTips(1), on(7)),
                    (TransferTips(2), on(8)),
                    (ReagentTips, on(10)),
                    (ReagentReservoir, on(3)),
                    (WaterReservoir, on(11)),
                ],
                checkpoints: Vec::new(),
                transfer_groups: vec![vec![1, 2]],
            },
            3 => Self {
                initial: vec![
                    (SamplePlate(1), on(1)),
                    (SamplePlate(2), on(2)),
                    (SamplePlate(3), on(3)),
                    (FinalPlate(1), on(4)),
                    (FinalPlate(2), on(5)),
                    (FinalPlate(3), on(6)),
                    (MixingTips(1), on(7)),
                    (MixingTips(2), on(8)),
                    (MixingTips(3), on(9)),
                    (ReagentReservoir, on(10)),
                    (WaterReservoir, on(11)),
                    (TransferTips(1), Placement::OffDeck),
                    (TransferTips(2), Placement::OffDeck),
                    (TransferTips(3), Placement::OffDeck),
                    (ReagentTips, Placement::OffDeck),
                ],
                checkpoints: vec![
                    Checkpoint {
                        stage: Stage::AfterChloroform,
                        requirements: vec![
                            Requirement::retired(MixingTips(1)),
                            Requirement::retired(MixingTips(2)),
                            Requirement::retired(MixingTips(3)),
                            Requirement::on_deck(TransferTips(1), 7),
                            Requirement::on_deck(TransferTips(2), 8),
                            Requirement::on_deck(TransferTips(3), 9),
                        ],
                    },
                    Checkpoint {
                        stage: Stage::AfterSupernatant,
                        requirements: vec![
                            Requirement::retired(WaterReservoir),
                            Requirement::on_deck(ReagentTips, 11),
                        ],
                    },
                ],
                transfer_groups: vec![vec![1, 2, 3]],
            },
            4 => Self {
                initial: vec![
                    (SamplePlate(1), on(1)),
                    (SamplePlate(2), on(2)),
                    (SamplePlate(3), on(3)),
                    (SamplePlate(4), on(7)),
                    (MixingTips(1), on(8)),
                    (MixingTips(2), on(9)),
                    (MixingTips(3), on(5)),
                    (MixingTips(4), on(6)),
                    (WaterReservoir, on(10)),
                    (ReagentReservoir, on(11)),
                    (TransferTips(1), Placement::OffDeck),
                    (TransferTips(2), Placement::OffDeck),
                    (TransferTips(3), Placement::OffDeck),
                    (TransferTips(4), Placement::OffDeck),
                    (FinalPlate(1), Placement::OffDeck),
                    (FinalPlate(2), Placement::OffDeck),
                    (FinalPlate(3), Placement::OffDeck),
                    (FinalPlate(4), Placement::OffDeck),
                    (ReagentTips, Placement::OffDeck),
                ],
                checkpoints: vec![
                    Checkpoint {
                        stage: Stage::AfterChloroform,
                        requirements: vec![
                            Requirement::retired(MixingTips(1)),
                            Requirement::retired(MixingTips(2)),
                            Requirement::retired(MixingTips(3)),
                            Requirement::retired(MixingTips(4)),
                            Requirement::retired(WaterReservoir),
                            Requirement::on_deck(TransferTips(1), 8),
                            Requirement::on_deck(TransferTips(2), 9),
                            Requirement::on_deck(FinalPlate(1), 4),
                            Requirement::on_deck(FinalPlate(2), 5),
                            Requirement::on_deck(FinalPlate(3), 6),
                            Requirement::on_deck(FinalPlate(4), 10),
                        ],
                    },
                    Checkpoint {
                        stage: Stage::AfterTransferGroup(0),
                        requirements: vec![
                            Requirement::retired(SamplePlate(1)),
                            Requirement::retired(SamplePlate(2)),
                            Requirement::on_deck(TransferTips(3), 2),
                            Requirement::on_deck(TransferTips(4), 1),
                        ],
                    },
                    Checkpoint {
                        stage: Stage::AfterSupernatant,
                        requirements: vec![
                            Requirement::retired(SamplePlate(3)),
                            Requirement::retired(SamplePlate(4)),
                            Requirement::on_deck(ReagentTips, 3),
                        ],
                    },
                ],
                transfer_groups: vec![vec![1, 2], vec![3, 4]],
            },
            _ => {
                return Err(ProtocolError::config(format!(
                    "{plates} plates requested, between 1 and {MAX_PLATES} are supported"
                )))
            }
        };
        Ok(topology)
    }

    pub fn initial(&self) -> &[(LabwareRole, Placement)] {
        &self.initial
    }

    /// Requirements for `stage`; empty when the layout never changes there.
    pub fn requirements(&self, stage: Stage) -> &[Requirement] {
        self.checkpoints
            .iter()
            .find(|c| c.stage == stage)
            .map(|c| c.requirements.as_slice())
            .unwrap_or(&[])
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Plate indices whose supernatant is transferred together, in order.
    pub fn transfer_groups(&self) -> &[Vec<u8>] {
        &self.transfer_groups
    }

    /// A deck ledger with every labware declared and loaded at its start position.
    pub fn initial_deck(&self) -> Result<Deck> {
        let mut deck = Deck::new();
        for (role, placement) in &self.initial {
            deck.declare(*role)?;
            deck.load(*role, *placement)?;
        }
        Ok(deck)
    }
}
