// src/drivers.rs
//
// =============================================================================
// ROBOCTAB: DRIVER MODULE & INTERFACE
// =============================================================================
//
// The Hexagonal Port.
//
// Responsibilities:
// 1. Define the `PipetteDriver` trait (The Contract).
// 2. Dispatch a `DriverKind` to a concrete implementation.
//
// Drivers only ever see absolute `DeviceOp`s from a plan that has already
// passed every capacity and deck check.

use crate::commands::DeviceOp;
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod console;
pub mod recording;

pub use console::ConsoleDriver;
pub use recording::RecordingDriver;

// ============================================================================
// 1. THE DRIVER TRAIT (The Contract)
// ============================================================================

pub trait PipetteDriver {
    fn name(&self) -> &str;

    /// Performs one non-barrier command. Errors abort the run.
    fn execute(&mut self, op: &DeviceOp) -> Result<()>;

    /// Operator barrier: returns only once the operator has acknowledged.
    fn pause(&mut self, message: &str) -> Result<()>;

    fn begin_run(&mut self, _fingerprint: &str, _plate_count: usize, _commands: usize) -> Result<()> {
        Ok(())
    }

    /// `failure` carries the failing command index and the error text.
    fn end_run(&mut self, _failure: Option<(usize, &str)>) -> Result<()> {
        Ok(())
    }
}

impl<T: PipetteDriver + ?Sized> PipetteDriver for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute(&mut self, op: &DeviceOp) -> Result<()> {
        (**self).execute(op)
    }

    fn pause(&mut self, message: &str) -> Result<()> {
        (**self).pause(message)
    }

    fn begin_run(&mut self, fingerprint: &str, plate_count: usize, commands: usize) -> Result<()> {
        (**self).begin_run(fingerprint, plate_count, commands)
    }

    fn end_run(&mut self, failure: Option<(usize, &str)>) -> Result<()> {
        (**self).end_run(failure)
    }
}

// ============================================================================
// 2. THE DISPATCHER (The Factory)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Prints commands, waits for Enter at every operator barrier.
    Console,
    /// Prints commands and acknowledges barriers automatically.
    Unattended,
    /// Keeps everything in memory; nothing is printed.
    DryRun,
}

pub struct DriverFactory;

impl DriverFactory {
    pub fn get(kind: DriverKind) -> Box<dyn PipetteDriver> {
        match kind {
            DriverKind::Console => Box::new(ConsoleDriver::stdio(false)),
            DriverKind::Unattended => Box::new(ConsoleDriver::stdio(true)),
            DriverKind::DryRun => Box::new(RecordingDriver::new()),
        }
    }
}
