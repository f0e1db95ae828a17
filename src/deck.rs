// src/deck.rs
//
// =============================================================================
// ROBOCTAB: DECK LEDGER & RELOCATION SCHEDULER
// =============================================================================
//
// The Inventory of physical slots.
//
// Responsibilities:
// 1. Track which labware sits in which slot (injective, trash never assignable).
// 2. Track each labware's lifecycle: Declared -> OnDeck | OffDeck -> ... -> Retired.
// 3. Reconcile a checkpoint's requirements into an ordered list of moves,
//    removals first, and commit them all or none.

use crate::core::{LabwareRole, Placement, SlotId};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

// ============================================================================
// 1. DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabwareState {
    /// Known to the run but not loaded yet.
    Declared,
    OnDeck(SlotId),
    OffDeck,
    /// Terminal: decontaminated or finished, never comes back.
    Retired,
}

impl LabwareState {
    pub fn placement(self) -> Option<Placement> {
        match self {
            LabwareState::OnDeck(slot) => Some(Placement::OnDeck(slot)),
            LabwareState::OffDeck | LabwareState::Retired => Some(Placement::OffDeck),
            LabwareState::Declared => None,
        }
    }
}

/// Desired state of one labware at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    OnDeck(SlotId),
    OffDeck,
    Retired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub labware: LabwareRole,
    pub target: Target,
}

impl Requirement {
    pub fn on_deck(labware: LabwareRole, slot: u8) -> Self {
        Self {
            labware,
            target: Target::OnDeck(SlotId(slot)),
        }
    }

    pub fn off_deck(labware: LabwareRole) -> Self {
        Self {
            labware,
            target: Target::OffDeck,
        }
    }

    pub fn retired(labware: LabwareRole) -> Self {
        Self {
            labware,
            target: Target::Retired,
        }
    }
}

/// One physical move the operator (or gripper) has to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub labware: LabwareRole,
    pub from: Placement,
    pub to: Placement,
    /// The labware leaves for good.
    pub retire: bool,
}

impl fmt::Display for Relocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.from, self.to) {
            (Placement::OnDeck(from), Placement::OffDeck) if self.retire => {
                write!(f, "remove {} from slot {from} (done)", self.labware)
            }
            (Placement::OnDeck(from), Placement::OffDeck) => {
                write!(f, "remove {} from slot {from}", self.labware)
            }
            (Placement::OffDeck, Placement::OnDeck(to)) => {
                write!(f, "place {} on slot {to}", self.labware)
            }
            (Placement::OnDeck(from), Placement::OnDeck(to)) => {
                write!(f, "move {} from slot {from} to slot {to}", self.labware)
            }
            (Placement::OffDeck, Placement::OffDeck) => write!(f, "retire {}", self.labware),
        }
    }
}

// ============================================================================
// 2. THE LEDGER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Deck {
    slots: BTreeMap<SlotId, LabwareRole>,
    states: BTreeMap<LabwareRole, LabwareState>,
}

impl Deck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every slot a labware may ever be assigned to.
    pub fn usable_slots() -> Vec<SlotId> {
        (1..=11).map(SlotId).collect()
    }

    pub fn declare(&mut self, labware: LabwareRole) -> Result<()> {
        if self.states.contains_key(&labware) {
            return Err(ProtocolError::IllegalTransition {
                labware,
                detail: "declared twice".into(),
            });
        }
        self.states.insert(labware, LabwareState::Declared);
        Ok(())
    }

    /// Initial placement: `Declared -> OnDeck | OffDeck`.
    pub fn load(&mut self, labware: LabwareRole, placement: Placement) -> Result<()> {
        match self.states.get(&labware) {
            None => return Err(ProtocolError::UnknownLabware(labware)),
            Some(LabwareState::Declared) => {}
            Some(state) => {
                return Err(ProtocolError::IllegalTransition {
                    labware,
                    detail: format!("already loaded ({state:?})"),
                })
            }
        }
        let state = match placement {
            Placement::OnDeck(slot) => {
                self.check_assignable(slot)?;
                self.slots.insert(slot, labware);
                LabwareState::OnDeck(slot)
            }
            Placement::OffDeck => LabwareState::OffDeck,
        };
        self.states.insert(labware, state);
        log::debug!("Loaded {} at {}", labware, placement);
        Ok(())
    }

    pub fn state(&self, labware: LabwareRole) -> Option<LabwareState> {
        self.states.get(&labware).copied()
    }

    pub fn placement(&self, labware: LabwareRole) -> Option<Placement> {
        self.state(labware).and_then(LabwareState::placement)
    }

    pub fn occupant(&self, slot: SlotId) -> Option<LabwareRole> {
        self.slots.get(&slot).copied()
    }

    pub fn is_on_deck(&self, labware: LabwareRole) -> bool {
        matches!(self.state(labware), Some(LabwareState::OnDeck(_)))
    }

    pub fn occupied(&self) -> impl Iterator<Item = (SlotId, LabwareRole)> + '_ {
        self.slots.iter().map(|(s, l)| (*s, *l))
    }

    /// Slot map and lifecycle states agree, one labware per slot, one slot per labware.
    pub fn is_injective(&self) -> bool {
        let mapped_agree = self.slots.iter().all(|(slot, labware)| {
            slot.is_usable() && self.states.get(labware) == Some(&LabwareState::OnDeck(*slot))
        });
        let on_deck = self
            .states
            .values()
            .filter(|s| matches!(s, LabwareState::OnDeck(_)))
            .count();
        mapped_agree && on_deck == self.slots.len()
    }

    // ------------------------------------------------------------------------
    // 3. RECONCILIATION
    // ------------------------------------------------------------------------

    /// Brings the deck to `required`, using only `available` slots for
    /// placements. Returns the moves in execution order. On error the deck
    /// is left exactly as it was.
    pub fn reconcile(
        &mut self,
        required: &[Requirement],
        available: &[SlotId],
    ) -> Result<Vec<Relocation>> {
        let mut scratch = self.clone();
        let relocations = scratch.apply(required, available)?;
        debug_assert!(scratch.is_injective());
        *self = scratch;
        Ok(relocations)
    }

    fn apply(&mut self, required: &[Requirement], available: &[SlotId]) -> Result<Vec<Relocation>> {
        self.check_requirements(required)?;

        let mut relocations = Vec::new();

        // Removals first, in requirement order.
        for req in required {
            let retire = match req.target {
                Target::OffDeck => false,
                Target::Retired => true,
                Target::OnDeck(_) => continue,
            };
            let next = if retire {
                LabwareState::Retired
            } else {
                LabwareState::OffDeck
            };
            match self.state(req.labware) {
                Some(LabwareState::OnDeck(slot)) => {
                    self.slots.remove(&slot);
                    self.states.insert(req.labware, next);
                    relocations.push(Relocation {
                        labware: req.labware,
                        from: Placement::OnDeck(slot),
                        to: Placement::OffDeck,
                        retire,
                    });
                }
                Some(LabwareState::OffDeck) => {
                    self.states.insert(req.labware, next);
                }
                _ => {}
            }
        }

        // Placements, each as soon as its target slot is empty.
        let mut pending: Vec<(LabwareRole, SlotId)> = Vec::new();
        for req in required {
            if let Target::OnDeck(slot) = req.target {
                if self.state(req.labware) == Some(LabwareState::OnDeck(slot)) {
                    continue;
                }
                if slot == SlotId::TRASH || !slot.is_usable() {
                    return Err(ProtocolError::SlotConflict {
                        slot,
                        detail: format!("{} cannot be placed on a non-assignable slot", req.labware),
                    });
                }
                if !available.contains(&slot) {
                    return Err(ProtocolError::SlotConflict {
                        slot,
                        detail: format!("slot is not available for {}", req.labware),
                    });
                }
                pending.push((req.labware, slot));
            }
        }

        while !pending.is_empty() {
            let before = pending.len();
            let mut waiting = Vec::with_capacity(pending.len());
            for (labware, slot) in pending {
                if self.slots.contains_key(&slot) {
                    waiting.push((labware, slot));
                    continue;
                }
                let from = self
                    .placement(labware)
                    .ok_or(ProtocolError::UnknownLabware(labware))?;
                if let Placement::OnDeck(old) = from {
                    self.slots.remove(&old);
                }
                self.slots.insert(slot, labware);
                self.states.insert(labware, LabwareState::OnDeck(slot));
                relocations.push(Relocation {
                    labware,
                    from,
                    to: Placement::OnDeck(slot),
                    retire: false,
                });
            }
            pending = waiting;

            if pending.len() == before {
                let (labware, slot) = pending[0];
                let holder = self
                    .occupant(slot)
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "unknown labware".into());
                return Err(ProtocolError::SlotConflict {
                    slot,
                    detail: format!("{labware} requires it but {holder} is not leaving"),
                });
            }
        }

        for relocation in &relocations {
            log::debug!("Relocation: {}", relocation);
        }
        Ok(relocations)
    }

    fn check_requirements(&self, required: &[Requirement]) -> Result<()> {
        let mut seen = HashSet::new();
        for req in required {
            if !seen.insert(req.labware) {
                return Err(ProtocolError::IllegalTransition {
                    labware: req.labware,
                    detail: "required twice at the same checkpoint".into(),
                });
            }
            match self.state(req.labware) {
                None => return Err(ProtocolError::UnknownLabware(req.labware)),
                Some(LabwareState::Declared) => {
                    return Err(ProtocolError::IllegalTransition {
                        labware: req.labware,
                        detail: "not loaded yet".into(),
                    })
                }
                Some(LabwareState::Retired) if req.target != Target::Retired => {
                    return Err(ProtocolError::IllegalTransition {
                        labware: req.labware,
                        detail: format!("retired labware cannot go to {:?}", req.target),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn check_assignable(&self, slot: SlotId) -> Result<()> {
        if !slot.is_usable() {
            return Err(ProtocolError::SlotConflict {
                slot,
                detail: "not an assignable slot".into(),
            });
        }
        match self.occupant(slot) {
            Some(holder) => Err(ProtocolError::SlotConflict {
                slot,
                detail: format!("occupied by {holder}"),
            }),
            None => Ok(()),
        }
    }
}
