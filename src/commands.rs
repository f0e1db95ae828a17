// src/commands.rs
//
// =============================================================================
// ROBOCTAB: DEVICE COMMAND STREAM
// =============================================================================
//
// The wire format between the planner and the robot: an ordered list of
// absolute device commands.
//
// Responsibilities:
// 1. Define `DeviceOp`, the only thing a driver ever receives.
// 2. Build command lists through `CommandStream`, which tracks the tip and the
//    volume it holds and refuses any command that would overfill it.

use crate::core::{LabwareRole, Location, Microliters, Placement};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// Float slack for volume comparisons (uL).
const VOLUME_EPSILON: f64 = 1e-9;

// ============================================================================
// 1. THE COMMANDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeviceOp {
    LoadLabware {
        labware: LabwareRole,
        load_name: String,
        placement: Placement,
    },
    MoveLabware {
        labware: LabwareRole,
        from: Placement,
        to: Placement,
    },
    /// Default gantry speed for subsequent moves (mm/s).
    SetSpeed { mm_per_s: f64 },
    /// `None` picks the next available tip.
    PickUpTip { location: Option<Location> },
    /// `None` drops into the trash.
    DropTip {
        location: Option<Location>,
        home_after: bool,
    },
    ReturnTip,
    Aspirate {
        volume: Microliters,
        location: Location,
        rate: f64,
    },
    Dispense {
        volume: Microliters,
        location: Location,
        rate: f64,
    },
    AirGap { volume: Microliters },
    BlowOut { location: Location },
    TouchTip {
        location: Location,
        v_offset: f64,
        radius: f64,
        speed: f64,
    },
    MoveTo {
        location: Location,
        speed: Option<f64>,
    },
    Delay { seconds: f64 },
    /// Operator barrier: execution blocks until acknowledged.
    Pause { message: String },
    Comment { message: String },
}

impl DeviceOp {
    pub fn is_pause(&self) -> bool {
        matches!(self, DeviceOp::Pause { .. })
    }

    /// The physical location the pipette visits, if any.
    pub fn location(&self) -> Option<Location> {
        match self {
            DeviceOp::PickUpTip { location } | DeviceOp::DropTip { location, .. } => *location,
            DeviceOp::Aspirate { location, .. }
            | DeviceOp::Dispense { location, .. }
            | DeviceOp::BlowOut { location }
            | DeviceOp::TouchTip { location, .. }
            | DeviceOp::MoveTo { location, .. } => Some(*location),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceOp::LoadLabware {
                labware,
                load_name,
                placement,
            } => write!(f, "load {labware} ({load_name}) -> {placement}"),
            DeviceOp::MoveLabware { labware, from, to } => {
                write!(f, "move {labware}: {from} -> {to}")
            }
            DeviceOp::SetSpeed { mm_per_s } => write!(f, "speed {mm_per_s} mm/s"),
            DeviceOp::PickUpTip { location: Some(loc) } => write!(f, "pick up tip at {loc}"),
            DeviceOp::PickUpTip { location: None } => write!(f, "pick up next tip"),
            DeviceOp::DropTip {
                location: Some(loc),
                ..
            } => write!(f, "drop tip at {loc}"),
            DeviceOp::DropTip { location: None, .. } => write!(f, "drop tip in trash"),
            DeviceOp::ReturnTip => write!(f, "return tip"),
            DeviceOp::Aspirate {
                volume,
                location,
                rate,
            } => write!(f, "aspirate {volume} from {location} (rate {rate})"),
            DeviceOp::Dispense {
                volume,
                location,
                rate,
            } => write!(f, "dispense {volume} to {location} (rate {rate})"),
            DeviceOp::AirGap { volume } => write!(f, "air gap {volume}"),
            DeviceOp::BlowOut { location } => write!(f, "blow out at {location}"),
            DeviceOp::TouchTip {
                location,
                v_offset,
                radius,
                speed,
            } => write!(
                f,
                "touch tip at {location} (v_offset {v_offset}, radius {radius}, speed {speed})"
            ),
            DeviceOp::MoveTo {
                location,
                speed: Some(speed),
            } => write!(f, "move to {location} at {speed} mm/s"),
            DeviceOp::MoveTo {
                location,
                speed: None,
            } => write!(f, "move to {location}"),
            DeviceOp::Delay { seconds } => write!(f, "delay {seconds}s"),
            DeviceOp::Pause { message } => write!(f, "PAUSE: {message}"),
            DeviceOp::Comment { message } => write!(f, "# {message}"),
        }
    }
}

// ============================================================================
// 2. THE STREAM BUILDER (Tip & Volume Guard)
// ============================================================================

/// Append-only builder for a command list.
///
/// Every liquid-handling call is checked against the tip state: aspirating
/// without a tip, picking up a second tip, or holding more than `capacity`
/// is an error and nothing is appended.
#[derive(Debug, Clone)]
pub struct CommandStream {
    ops: Vec<DeviceOp>,
    capacity: f64,
    held: f64,
    has_tip: bool,
    speed: Option<f64>,
}

impl CommandStream {
    pub fn new(capacity: Microliters) -> Self {
        Self {
            ops: Vec::new(),
            capacity: capacity.0,
            held: 0.0,
            has_tip: false,
            speed: None,
        }
    }

    /// Volume (liquid and air) currently in the tip.
    pub fn held(&self) -> Microliters {
        Microliters(self.held)
    }

    pub fn has_tip(&self) -> bool {
        self.has_tip
    }

    pub fn ops(&self) -> &[DeviceOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<DeviceOp> {
        self.ops
    }

    // --- Tip lifecycle ---

    pub fn pick_up_tip(&mut self, location: Option<Location>) -> Result<()> {
        if self.has_tip {
            return Err(ProtocolError::TipState(
                "pick-up requested while a tip is already attached".into(),
            ));
        }
        self.has_tip = true;
        self.held = 0.0;
        self.ops.push(DeviceOp::PickUpTip { location });
        Ok(())
    }

    pub fn drop_tip(&mut self, location: Option<Location>, home_after: bool) -> Result<()> {
        self.require_tip("drop tip")?;
        self.has_tip = false;
        self.held = 0.0;
        self.ops.push(DeviceOp::DropTip {
            location,
            home_after,
        });
        Ok(())
    }

    pub fn return_tip(&mut self) -> Result<()> {
        self.require_tip("return tip")?;
        self.has_tip = false;
        self.held = 0.0;
        self.ops.push(DeviceOp::ReturnTip);
        Ok(())
    }

    // --- Liquid handling ---

    pub fn aspirate(&mut self, volume: f64, location: Location, rate: f64) -> Result<()> {
        self.load(volume, "aspirate")?;
        self.ops.push(DeviceOp::Aspirate {
            volume: Microliters(volume),
            location,
            rate,
        });
        Ok(())
    }

    /// Dispensing more than is held expels trailing air; the load floors at zero.
    pub fn dispense(&mut self, volume: f64, location: Location, rate: f64) -> Result<()> {
        self.require_tip("dispense")?;
        Self::require_positive(volume, "dispense")?;
        self.held = (self.held - volume).max(0.0);
        self.ops.push(DeviceOp::Dispense {
            volume: Microliters(volume),
            location,
            rate,
        });
        Ok(())
    }

    pub fn air_gap(&mut self, volume: f64) -> Result<()> {
        self.load(volume, "air gap")?;
        self.ops.push(DeviceOp::AirGap {
            volume: Microliters(volume),
        });
        Ok(())
    }

    pub fn blow_out(&mut self, location: Location) -> Result<()> {
        self.require_tip("blow out")?;
        self.held = 0.0;
        self.ops.push(DeviceOp::BlowOut { location });
        Ok(())
    }

    pub fn touch_tip(
        &mut self,
        location: Location,
        v_offset: f64,
        radius: f64,
        speed: f64,
    ) -> Result<()> {
        self.require_tip("touch tip")?;
        self.ops.push(DeviceOp::TouchTip {
            location,
            v_offset,
            radius,
            speed,
        });
        Ok(())
    }

    // --- Motion & control ---

    pub fn move_to(&mut self, location: Location, speed: Option<f64>) {
        self.ops.push(DeviceOp::MoveTo { location, speed });
    }

    pub fn set_speed(&mut self, mm_per_s: f64) {
        self.speed = Some(mm_per_s);
        self.ops.push(DeviceOp::SetSpeed { mm_per_s });
    }

    /// Like `set_speed`, but emits nothing when the speed is already in effect.
    pub fn ensure_speed(&mut self, mm_per_s: f64) {
        if self.speed != Some(mm_per_s) {
            self.set_speed(mm_per_s);
        }
    }

    pub fn delay(&mut self, seconds: f64) {
        self.ops.push(DeviceOp::Delay { seconds });
    }

    pub fn pause(&mut self, message: impl Into<String>) {
        self.ops.push(DeviceOp::Pause {
            message: message.into(),
        });
    }

    pub fn comment(&mut self, message: impl Into<String>) {
        self.ops.push(DeviceOp::Comment {
            message: message.into(),
        });
    }

    // --- Deck ---

    pub fn load_labware(
        &mut self,
        labware: LabwareRole,
        load_name: impl Into<String>,
        placement: Placement,
    ) {
        self.ops.push(DeviceOp::LoadLabware {
            labware,
            load_name: load_name.into(),
            placement,
        });
    }

    pub fn move_labware(&mut self, labware: LabwareRole, from: Placement, to: Placement) {
        self.ops.push(DeviceOp::MoveLabware { labware, from, to });
    }

    // --- Guards ---

    fn load(&mut self, volume: f64, what: &str) -> Result<()> {
        self.require_tip(what)?;
        Self::require_positive(volume, what)?;
        if self.held + volume > self.capacity + VOLUME_EPSILON {
            return Err(ProtocolError::CapacityViolation {
                requested: volume,
                held: self.held,
                capacity: self.capacity,
            });
        }
        self.held += volume;
        Ok(())
    }

    fn require_tip(&self, what: &str) -> Result<()> {
        if self.has_tip {
            Ok(())
        } else {
            Err(ProtocolError::TipState(format!("{what} without a tip")))
        }
    }

    fn require_positive(volume: f64, what: &str) -> Result<()> {
        if volume.is_finite() && volume > 0.0 {
            Ok(())
        } else {
            Err(ProtocolError::TipState(format!(
                "{what} volume must be positive, got {volume}"
            )))
        }
    }
}
