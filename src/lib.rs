// src/lib.rs
//
// =============================================================================
// ROBOCTAB: LIBRARY ROOT
// =============================================================================
//
// This file declares the module tree and exports public types.

// 1. Declare Modules
pub mod addressing;
pub mod commands;
pub mod config;
pub mod core;
pub mod deck;
pub mod distribution;
pub mod drivers;
pub mod error;
pub mod journal;
pub mod protocol;
pub mod reagents;
pub mod runner;
pub mod steps;
pub mod topology;

// 2. Re-exports (The Public API)

pub use crate::addressing::{ColumnRange, DestinationSet};
pub use crate::commands::{CommandStream, DeviceOp};
pub use crate::config::{ChloroformMixing, ProtocolConfig};
pub use crate::core::{LabwareRole, Location, Microliters, Placement, SlotId};
pub use crate::deck::{Deck, Relocation, Requirement};
pub use crate::distribution::{distribute, DistributionRequest, ReagentPhase, TipDisposition};
pub use crate::drivers::{PipetteDriver, RecordingDriver};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{plan, ProtocolPlan};
pub use crate::runner::{execute_plan, RunReport};
pub use crate::topology::{DeckTopology, Stage};
