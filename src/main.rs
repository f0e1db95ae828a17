// src/main.rs
//
// =============================================================================
// ROBOCTAB: COMMANDER & ENTRY POINT
// =============================================================================
//
// Modes:
// 1. CHECK:      Validate a configuration, print plate count and fingerprint.
// 2. PLAN:       Dry run; print the full command sequence (text or JSON).
// 3. RUN:        Execute through a driver, journaling every command.
// 4. DISTRIBUTE: Plan one ad-hoc reagent distribution.
// 5. JOURNAL:    Read back a run journal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use roboctab::addressing::ColumnRange;
use roboctab::config::ProtocolConfig;
use roboctab::distribution::ReagentPhase;
use roboctab::drivers::{DriverFactory, DriverKind};
use roboctab::journal::{JournalEntry, JournalReader, JournalWriter, JournaledDriver};
use roboctab::protocol::{plan, single_distribution};
use roboctab::runner::execute_plan;

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "roboctab",
    version,
    about = "Automated CTAB DNA extraction sequencer"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file.
    Check {
        /// YAML configuration; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Build the full plan and print it without executing anything.
    Plan {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Emit the plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Execute the protocol.
    Run {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Append every executed command to this journal.
        #[arg(long, default_value = "roboctab.journal")]
        journal: PathBuf,

        #[arg(long, value_enum, default_value_t = DriverKind::Console)]
        driver: DriverKind,
    },

    /// Plan a single reagent distribution onto one plate.
    Distribute {
        #[arg(long, value_enum)]
        phase: ReagentPhase,

        /// Plate index (1-based).
        #[arg(long, default_value_t = 1)]
        plate: u8,

        #[arg(long, default_value_t = 1)]
        first: u8,

        #[arg(long, default_value_t = 12)]
        last: u8,

        /// Volume per column (uL).
        #[arg(long)]
        volume: f64,

        #[arg(long, default_value_t = 300.0)]
        capacity: f64,
    },

    /// Print the records of a run journal.
    Journal {
        #[arg(long)]
        path: PathBuf,
    },
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match cli.command {
        Commands::Check { config } => run_check(config.as_deref()),
        Commands::Plan { config, json } => run_plan(config.as_deref(), json),
        Commands::Run {
            config,
            journal,
            driver,
        } => run_protocol(config.as_deref(), &journal, driver),
        Commands::Distribute {
            phase,
            plate,
            first,
            last,
            volume,
            capacity,
        } => run_distribute(phase, plate, ColumnRange::new(first, last), volume, capacity),
        Commands::Journal { path } => run_journal(&path),
    }
}

fn load_config(path: Option<&Path>) -> Result<ProtocolConfig> {
    match path {
        Some(p) => ProtocolConfig::load_yaml(p)
            .with_context(|| format!("Failed to load configuration {}", p.display())),
        None => {
            log::info!("No configuration given; using the stock protocol");
            Ok(ProtocolConfig::default())
        }
    }
}

// ============================================================================
// 3. SUBCOMMANDS
// ============================================================================

fn run_check(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let plates = config.plate_count()?;
    println!("configuration OK");
    println!("  plates:      {plates}");
    println!("  columns:     {}", config.total_columns());
    println!("  mixing:      {:?}", config.chloroform_mixing);
    println!("  fingerprint: {}", config.fingerprint()?);
    Ok(())
}

fn run_plan(path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(path)?;
    let plan = plan(&config).context("Planning failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    for (i, op) in plan.ops.iter().enumerate() {
        println!("{:>5}  {}", i, op);
    }
    println!(
        "-- {} commands, {} operator pauses, {} deck checkpoint(s)",
        plan.ops.len(),
        plan.pause_count(),
        plan.checkpoints.len()
    );
    Ok(())
}

fn run_protocol(path: Option<&Path>, journal: &Path, kind: DriverKind) -> Result<()> {
    let config = load_config(path)?;
    // Every invariant is checked here, before the first command is sent.
    let plan = plan(&config).context("Planning failed; nothing was executed")?;

    let writer = JournalWriter::open(journal)
        .with_context(|| format!("Failed to open journal {}", journal.display()))?
        .with_fsync(true);
    let mut driver = JournaledDriver::new(DriverFactory::get(kind), writer);

    let report = execute_plan(&plan, &mut driver)?;
    log::info!(
        "Journal written to {} ({} commands)",
        journal.display(),
        report.commands_executed + report.pauses_acknowledged
    );
    Ok(())
}

fn run_distribute(
    phase: ReagentPhase,
    plate: u8,
    range: ColumnRange,
    volume: f64,
    capacity: f64,
) -> Result<()> {
    let ops = single_distribution(phase, plate, range, volume, capacity)
        .with_context(|| format!("Cannot plan {phase:?} distribution"))?;
    for (i, op) in ops.iter().enumerate() {
        println!("{:>4}  {}", i, op);
    }
    Ok(())
}

fn run_journal(path: &Path) -> Result<()> {
    let mut reader = JournalReader::open(path)?;
    let records = reader.read_all()?;
    log::info!(
        "Read {} up to byte {}",
        reader.path().display(),
        reader.cursor()
    );
    for record in &records {
        let ts = chrono::DateTime::from_timestamp_millis(record.ts_ms)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| record.ts_ms.to_string());
        match &record.entry {
            JournalEntry::Command { index, op } => println!("{ts}  {index:>5}  {op}"),
            JournalEntry::Paused { index, message } => {
                println!("{ts}  {index:>5}  PAUSE: {message}")
            }
            other => println!("{ts}  -- {}", serde_json::to_string(other)?),
        }
    }
    println!("-- {} record(s)", records.len());
    Ok(())
}
