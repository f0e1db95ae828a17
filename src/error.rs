// src/error.rs
//
// =============================================================================
// ROBOCTAB: ERROR TAXONOMY
// =============================================================================
//
// Every failure is fatal. Configuration and invariant errors are raised while
// the plan is being built, before the first physical command is issued.

use crate::core::{LabwareRole, SlotId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Pre-flight configuration problem (volumes, column ranges, plates).
    #[error("configuration error: {0}")]
    Config(String),

    /// A computed tip load would exceed the instrument capacity.
    #[error("capacity violation: {requested} uL requested with {held} uL already held (capacity {capacity} uL)")]
    CapacityViolation {
        requested: f64,
        held: f64,
        capacity: f64,
    },

    /// Pipette command issued in a tip state that cannot accept it.
    #[error("tip state violation: {0}")]
    TipState(String),

    /// A relocation would target a slot that is occupied or unavailable.
    #[error("slot conflict on slot {slot}: {detail}")]
    SlotConflict { slot: SlotId, detail: String },

    /// A labware lifecycle transition that the state machine forbids.
    #[error("illegal transition for {labware}: {detail}")]
    IllegalTransition { labware: LabwareRole, detail: String },

    #[error("unknown labware: {0}")]
    UnknownLabware(LabwareRole),

    /// A planned command touches labware that is not on the deck at that point.
    #[error("command {step} uses {labware}, which is not on the deck")]
    NotOnDeck { labware: LabwareRole, step: usize },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse protocol configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("journal error: {0}")]
    Journal(String),
}

impl ProtocolError {
    pub fn config(msg: impl Into<String>) -> Self {
        ProtocolError::Config(msg.into())
    }

    pub fn io(source: std::io::Error, path: impl Into<String>) -> Self {
        ProtocolError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
