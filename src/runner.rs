// src/runner.rs
//
// =============================================================================
// ROBOCTAB: RUN EXECUTOR
// =============================================================================
//
// Hands a validated plan to a driver, one command at a time.
//
// Responsibilities:
// 1. Route barrier commands to `pause`, everything else to `execute`.
// 2. Stop at the first driver failure; nothing is retried.
// 3. Report what happened (counts, timestamps) to the caller.

use crate::commands::DeviceOp;
use crate::drivers::PipetteDriver;
use crate::protocol::ProtocolPlan;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub driver: String,
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub commands_executed: usize,
    pub pauses_acknowledged: usize,
}

impl RunReport {
    pub fn duration_s(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Executes every command of `plan` in order.
pub fn execute_plan<D: PipetteDriver + ?Sized>(
    plan: &ProtocolPlan,
    driver: &mut D,
) -> Result<RunReport> {
    let started_at = Utc::now();
    driver
        .begin_run(&plan.fingerprint, plan.plate_count, plan.ops.len())
        .context("driver refused to start the run")?;
    log::info!(
        "Run started on '{}' driver: {} commands",
        driver.name(),
        plan.ops.len()
    );

    let mut commands_executed = 0;
    let mut pauses_acknowledged = 0;

    for (index, op) in plan.ops.iter().enumerate() {
        let outcome = match op {
            DeviceOp::Pause { message } => {
                log::info!("Waiting for operator: {}", message);
                driver.pause(message).map(|_| pauses_acknowledged += 1)
            }
            other => driver.execute(other).map(|_| commands_executed += 1),
        };

        if let Err(e) = outcome {
            let error = format!("{e:#}");
            log::error!("Command {} ({}) failed: {}", index, op, error);
            if let Err(end) = driver.end_run(Some((index, &error))) {
                log::warn!("Driver failed to record the abort: {:#}", end);
            }
            return Err(e).with_context(|| format!("run aborted at command {index}: {op}"));
        }
    }

    driver
        .end_run(None)
        .context("driver failed to close the run")?;

    let report = RunReport {
        driver: driver.name().to_string(),
        fingerprint: plan.fingerprint.clone(),
        started_at,
        finished_at: Utc::now(),
        commands_executed,
        pauses_acknowledged,
    };
    log::info!(
        "Run finished: {} commands, {} pauses in {:.1}s",
        report.commands_executed,
        report.pauses_acknowledged,
        report.duration_s()
    );
    Ok(report)
}
