// src/journal.rs
//
// =============================================================================
// ROBOCTAB: RUN JOURNAL
// =============================================================================
//
// Responsibilities:
// - Append-only record of what was actually sent to the robot.
// - Hybrid serialization:
//   1. Container: bincode (compact, typed).
//   2. Payload: JSON bytes, so entries can grow fields without breaking old files.
//
// Frame layout: [MAGIC u32][CRC32 u32][LEN u32][bincode DiskRecord], all LE.
// The reader skips damaged frames by scanning forward for the next MAGIC.

use crate::commands::DeviceOp;
use crate::drivers::PipetteDriver;
use crate::error::{ProtocolError, Result};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

// -----------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------

// "RCTB" in ASCII
const MAGIC_BYTES: u32 = 0x5243_5442;

const HEADER_LEN: u64 = 12;

// Corrupt length fields must not turn into huge allocations.
const MAX_RECORD_SIZE: u32 = 16 * 1024 * 1024;

// -----------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum JournalEntry {
    RunStarted {
        fingerprint: String,
        plate_count: usize,
        commands: usize,
    },
    Command {
        index: usize,
        op: DeviceOp,
    },
    /// An operator barrier that was acknowledged.
    Paused {
        index: usize,
        message: String,
    },
    RunFinished {
        commands: usize,
    },
    RunFailed {
        index: usize,
        error: String,
    },
}

impl JournalEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            JournalEntry::RunStarted { .. } => "run_started",
            JournalEntry::Command { .. } => "command",
            JournalEntry::Paused { .. } => "paused",
            JournalEntry::RunFinished { .. } => "run_finished",
            JournalEntry::RunFailed { .. } => "run_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalRecord {
    pub ts_ms: i64,
    pub entry: JournalEntry,
}

/// The on-disk container; the entry travels as JSON bytes.
#[derive(Serialize, Deserialize)]
struct DiskRecord {
    ts_ms: i64,
    kind: String,
    payload_json: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct JournalEnvelope {
    /// Offset of the MAGIC bytes.
    pub offset: u64,
    pub next_offset: u64,
    pub record: JournalRecord,
}

fn journal_err(context: &str, err: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Journal(format!("{context}: {err}"))
}

// =============================================================================
// WRITER
// =============================================================================

pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    fsync: bool,
}

impl JournalWriter {
    /// Opens the journal in append mode, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ProtocolError::io(e, parent.display().to_string()))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ProtocolError::io(e, path.display().to_string()))?;
        // Append mode does not move the cursor; offsets are reported from the end.
        file.seek(SeekFrom::End(0))
            .map_err(|e| ProtocolError::io(e, path.display().to_string()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            fsync: false,
        })
    }

    /// `fsync` after every append.
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Appends one entry; returns the offset it was written at.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<u64> {
        let payload_json =
            serde_json::to_vec(entry).map_err(|e| journal_err("payload serialization", e))?;
        let disk = DiskRecord {
            ts_ms: chrono::Utc::now().timestamp_millis(),
            kind: entry.kind().to_string(),
            payload_json,
        };
        let bytes = bincode::serialize(&disk).map_err(|e| journal_err("bincode", e))?;

        let len = u32::try_from(bytes.len())
            .ok()
            .filter(|len| *len <= MAX_RECORD_SIZE)
            .ok_or_else(|| {
                ProtocolError::Journal(format!("record of {} bytes is too large", bytes.len()))
            })?;

        let mut hasher = Hasher::new();
        hasher.update(&bytes);
        let crc = hasher.finalize();

        let io = |e| ProtocolError::io(e, self.path.display().to_string());
        let offset = self.writer.stream_position().map_err(io)?;
        let mut frame = Vec::with_capacity(HEADER_LEN as usize + bytes.len());
        frame.extend_from_slice(&MAGIC_BYTES.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&bytes);
        self.writer.write_all(&frame).map_err(io)?;
        self.writer.flush().map_err(io)?;
        if self.fsync {
            self.writer.get_ref().sync_data().map_err(io)?;
        }
        Ok(offset)
    }
}

// =============================================================================
// READER (self-healing)
// =============================================================================

pub struct JournalReader {
    reader: BufReader<File>,
    cursor: u64,
    path: PathBuf,
}

impl JournalReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ProtocolError::io(e, path.display().to_string()))?;
        Ok(Self {
            reader: BufReader::new(file),
            cursor: 0,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Reads every valid record from the current cursor to the end.
    pub fn read_all(&mut self) -> Result<Vec<JournalRecord>> {
        let mut records = Vec::new();
        while let Some(envelope) = self.next_record()? {
            records.push(envelope.record);
        }
        Ok(records)
    }

    fn io(&self, e: std::io::Error) -> ProtocolError {
        ProtocolError::io(e, self.path.display().to_string())
    }

    /// `Ok(None)` at end of file, including a torn write at the tail.
    pub fn next_record(&mut self) -> Result<Option<JournalEnvelope>> {
        loop {
            let start = self.cursor;
            self.reader
                .seek(SeekFrom::Start(start))
                .map_err(|e| self.io(e))?;

            let mut header = [0u8; HEADER_LEN as usize];
            match self.reader.read_exact(&mut header) {
                Ok(()) => {}
                // Clean EOF, or a torn header too short to hold a frame.
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(self.io(e)),
            }

            let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            let len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

            if magic != MAGIC_BYTES {
                log::warn!(
                    "Journal corruption at offset {} in {}; scanning",
                    start,
                    self.path.display()
                );
                if self.resync(start)? {
                    continue;
                }
                return Ok(None);
            }

            if len > MAX_RECORD_SIZE {
                log::error!("Implausible record length {} at {}", len, start);
                if self.resync(start)? {
                    continue;
                }
                return Ok(None);
            }

            let mut payload = vec![0u8; len as usize];
            if self.reader.read_exact(&mut payload).is_err() {
                // Torn payload; a later frame may still be intact.
                if self.resync(start)? {
                    continue;
                }
                return Ok(None);
            }

            let mut hasher = Hasher::new();
            hasher.update(&payload);
            if hasher.finalize() != expected_crc {
                log::error!("CRC mismatch at {}", start);
                if self.resync(start)? {
                    continue;
                }
                return Ok(None);
            }

            let next_offset = start + HEADER_LEN + u64::from(len);
            let disk: DiskRecord = match bincode::deserialize(&payload) {
                Ok(r) => r,
                Err(e) => {
                    log::error!("Undecodable record at {}: {}", start, e);
                    self.cursor = next_offset;
                    continue;
                }
            };
            let entry: JournalEntry = match serde_json::from_slice(&disk.payload_json) {
                Ok(v) => v,
                Err(e) => {
                    log::error!("Undecodable entry at {}: {}", start, e);
                    self.cursor = next_offset;
                    continue;
                }
            };

            self.cursor = next_offset;
            return Ok(Some(JournalEnvelope {
                offset: start,
                next_offset,
                record: JournalRecord {
                    ts_ms: disk.ts_ms,
                    entry,
                },
            }));
        }
    }

    /// Moves the cursor to the next MAGIC after `start`. `false` at EOF.
    fn resync(&mut self, start: u64) -> Result<bool> {
        match self.scan_for_magic(start + 1)? {
            Some(offset) => {
                self.cursor = offset;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn scan_for_magic(&mut self, from: u64) -> Result<Option<u64>> {
        self.reader
            .seek(SeekFrom::Start(from))
            .map_err(|e| self.io(e))?;

        let mut window = [0u8; 4];
        let mut filled = 0;
        let mut pos = from;
        let mut byte = [0u8; 1];

        loop {
            if filled == 4 && u32::from_le_bytes(window) == MAGIC_BYTES {
                return Ok(Some(pos - 4));
            }
            let n = self.reader.read(&mut byte).map_err(|e| self.io(e))?;
            if n == 0 {
                return Ok(None);
            }
            if filled < 4 {
                window[filled] = byte[0];
                filled += 1;
            } else {
                window.rotate_left(1);
                window[3] = byte[0];
            }
            pos += 1;
        }
    }
}

// =============================================================================
// JOURNALED DRIVER
// =============================================================================

/// Wraps a driver and records every command it accepted.
pub struct JournaledDriver<D> {
    inner: D,
    writer: JournalWriter,
    executed: usize,
}

impl<D: PipetteDriver> JournaledDriver<D> {
    pub fn new(inner: D, writer: JournalWriter) -> Self {
        Self {
            inner,
            writer,
            executed: 0,
        }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: PipetteDriver> PipetteDriver for JournaledDriver<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn execute(&mut self, op: &DeviceOp) -> anyhow::Result<()> {
        self.inner.execute(op)?;
        self.writer.append(&JournalEntry::Command {
            index: self.executed,
            op: op.clone(),
        })?;
        self.executed += 1;
        Ok(())
    }

    fn pause(&mut self, message: &str) -> anyhow::Result<()> {
        self.inner.pause(message)?;
        self.writer.append(&JournalEntry::Paused {
            index: self.executed,
            message: message.to_string(),
        })?;
        self.executed += 1;
        Ok(())
    }

    fn begin_run(&mut self, fingerprint: &str, plate_count: usize, commands: usize) -> anyhow::Result<()> {
        self.inner.begin_run(fingerprint, plate_count, commands)?;
        self.writer.append(&JournalEntry::RunStarted {
            fingerprint: fingerprint.to_string(),
            plate_count,
            commands,
        })?;
        Ok(())
    }

    fn end_run(&mut self, failure: Option<(usize, &str)>) -> anyhow::Result<()> {
        let entry = match failure {
            Some((index, error)) => JournalEntry::RunFailed {
                index,
                error: error.to_string(),
            },
            None => JournalEntry::RunFinished {
                commands: self.executed,
            },
        };
        self.writer.append(&entry)?;
        self.inner.end_run(failure)
    }
}
