// src/drivers/recording.rs
//
// In-memory driver for dry runs and tests.

use crate::commands::DeviceOp;
use crate::drivers::PipetteDriver;
use anyhow::{anyhow, Result};

#[derive(Debug, Default)]
pub struct RecordingDriver {
    pub executed: Vec<DeviceOp>,
    pub pauses: Vec<String>,
    /// Fail on the n-th call (0-based) to exercise abort paths.
    fail_at: Option<usize>,
    calls: usize,
    pub finished: Option<bool>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(call: usize) -> Self {
        Self {
            fail_at: Some(call),
            ..Self::default()
        }
    }

    fn tick(&mut self) -> Result<()> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_at == Some(call) {
            return Err(anyhow!("simulated hardware fault on call {call}"));
        }
        Ok(())
    }
}

impl PipetteDriver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn execute(&mut self, op: &DeviceOp) -> Result<()> {
        self.tick()?;
        self.executed.push(op.clone());
        Ok(())
    }

    fn pause(&mut self, message: &str) -> Result<()> {
        self.tick()?;
        self.pauses.push(message.to_string());
        Ok(())
    }

    fn end_run(&mut self, failure: Option<(usize, &str)>) -> Result<()> {
        self.finished = Some(failure.is_none());
        Ok(())
    }
}
