// src/drivers/console.rs
//
// =============================================================================
// ROBOCTAB: CONSOLE DRIVER
// =============================================================================
//
// Prints every command and blocks on the operator's input at barriers.
// Generic over its streams so it can be driven from tests.

use crate::commands::DeviceOp;
use crate::drivers::PipetteDriver;
use anyhow::{bail, Context, Result};
use std::io::{self, BufRead, StdinLock, Stdout, Write};

pub struct ConsoleDriver<R, W> {
    input: R,
    output: W,
    /// Acknowledge barriers without waiting for input.
    auto_ack: bool,
    executed: usize,
}

impl ConsoleDriver<StdinLock<'static>, Stdout> {
    pub fn stdio(auto_ack: bool) -> Self {
        Self::new(io::stdin().lock(), io::stdout(), auto_ack)
    }
}

impl<R: BufRead, W: Write> ConsoleDriver<R, W> {
    pub fn new(input: R, output: W, auto_ack: bool) -> Self {
        Self {
            input,
            output,
            auto_ack,
            executed: 0,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> PipetteDriver for ConsoleDriver<R, W> {
    fn name(&self) -> &str {
        "console"
    }

    fn execute(&mut self, op: &DeviceOp) -> Result<()> {
        if let DeviceOp::Pause { message } = op {
            return self.pause(message);
        }
        self.executed += 1;
        log::debug!("[{}] {}", self.executed, op);
        writeln!(self.output, "{:>5}  {}", self.executed, op).context("console write failed")?;
        Ok(())
    }

    fn pause(&mut self, message: &str) -> Result<()> {
        self.executed += 1;
        writeln!(self.output, "{:>5}  PAUSE: {}", self.executed, message)
            .context("console write failed")?;
        if self.auto_ack {
            log::info!("Barrier acknowledged automatically: {}", message);
            return Ok(());
        }
        write!(self.output, "       press Enter to resume > ")?;
        self.output.flush()?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read operator acknowledgement")?;
        if read == 0 {
            bail!("operator input closed while waiting at: {message}");
        }
        Ok(())
    }

    fn begin_run(&mut self, fingerprint: &str, plate_count: usize, commands: usize) -> Result<()> {
        writeln!(
            self.output,
            "RoboCTAB run: {plate_count} plate(s), {commands} commands, config {fingerprint}"
        )?;
        Ok(())
    }

    fn end_run(&mut self, failure: Option<(usize, &str)>) -> Result<()> {
        match failure {
            None => writeln!(self.output, "Run complete.")?,
            Some((index, error)) => writeln!(self.output, "Run aborted at command {index}: {error}")?,
        }
        self.output.flush()?;
        Ok(())
    }
}
