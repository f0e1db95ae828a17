use roboctab::commands::DeviceOp;
use roboctab::config::ProtocolConfig;
use roboctab::core::{LabwareRole, Location, Microliters};
use roboctab::drivers::{ConsoleDriver, PipetteDriver, RecordingDriver};
use roboctab::journal::{JournalEntry, JournalReader, JournalWriter, JournaledDriver};
use roboctab::protocol::plan;
use roboctab::runner::execute_plan;
use std::fs::{self, OpenOptions};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::PathBuf;

fn temp_journal(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "roboctab_{}_{}.journal",
        name,
        std::process::id()
    ));
    let _ = fs::remove_file(&path);
    path
}

fn command(index: usize) -> JournalEntry {
    JournalEntry::Command {
        index,
        op: DeviceOp::Aspirate {
            volume: Microliters(50.0 + index as f64),
            location: Location::well(LabwareRole::SamplePlate(1), 1).bottom(2.5),
            rate: 1.0,
        },
    }
}

#[test]
fn test_journal_round_trip() {
    let path = temp_journal("round_trip");
    let entries = vec![
        JournalEntry::RunStarted {
            fingerprint: "abc".into(),
            plate_count: 1,
            commands: 3,
        },
        command(0),
        JournalEntry::Paused {
            index: 1,
            message: "Grind samples".into(),
        },
        command(2),
        JournalEntry::RunFinished { commands: 3 },
    ];

    {
        let mut writer = JournalWriter::open(&path).expect("journal opens");
        for entry in &entries {
            writer.append(entry).unwrap();
        }
    }

    let mut reader = JournalReader::open(&path).unwrap();
    let records = reader.read_all().unwrap();
    let read: Vec<JournalEntry> = records.into_iter().map(|r| r.entry).collect();
    assert_eq!(read, entries);
    assert_eq!(reader.cursor(), fs::metadata(&path).unwrap().len());

    let _ = fs::remove_file(&path);
}

#[test]
fn test_reopened_journal_reports_true_offsets() {
    let path = temp_journal("reopen");
    let first = {
        let mut writer = JournalWriter::open(&path).unwrap();
        writer.append(&command(0)).unwrap();
        writer.append(&command(1)).unwrap()
    };
    let mut writer = JournalWriter::open(&path).unwrap();
    let third = writer.append(&command(2)).unwrap();
    assert!(third > first);

    let mut reader = JournalReader::open(&path).unwrap();
    let mut offsets = Vec::new();
    while let Some(envelope) = reader.next_record().unwrap() {
        offsets.push(envelope.offset);
    }
    assert_eq!(offsets.len(), 3);
    assert_eq!(offsets[1], first);
    assert_eq!(offsets[2], third);

    let _ = fs::remove_file(&path);
}

#[test]
fn test_reader_skips_corrupted_record() {
    let path = temp_journal("corrupt");
    let offsets: Vec<u64> = {
        let mut writer = JournalWriter::open(&path).unwrap();
        (0..3).map(|i| writer.append(&command(i)).unwrap()).collect()
    };

    // Flip a payload byte of the middle record.
    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(offsets[1] + 16)).unwrap();
        file.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
    }

    let records = JournalReader::open(&path).unwrap().read_all().unwrap();
    let read: Vec<JournalEntry> = records.into_iter().map(|r| r.entry).collect();
    assert_eq!(read, vec![command(0), command(2)]);

    let _ = fs::remove_file(&path);
}

#[test]
fn test_reader_survives_garbage_and_torn_tail() {
    let path = temp_journal("garbage");
    fs::write(&path, b"not a journal").unwrap();
    {
        let mut writer = JournalWriter::open(&path).unwrap();
        writer.append(&command(0)).unwrap();
        writer.append(&command(1)).unwrap();
    }
    let len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    let records = JournalReader::open(&path).unwrap().read_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entry, command(0));

    let _ = fs::remove_file(&path);
}

#[test]
fn test_journaled_run_records_every_command() {
    let path = temp_journal("journaled_run");
    let config = ProtocolConfig::from_yaml("plates: [{first: 1, last: 2}]").unwrap();
    let run = plan(&config).unwrap();

    let writer = JournalWriter::open(&path).unwrap();
    let mut driver = JournaledDriver::new(RecordingDriver::new(), writer);
    let report = execute_plan(&run, &mut driver).expect("run completes");
    assert_eq!(report.driver, "recording");
    let inner = driver.into_inner();
    assert_eq!(inner.finished, Some(true));

    let records = JournalReader::open(&path).unwrap().read_all().unwrap();
    assert_eq!(records.len(), run.ops.len() + 2);
    assert!(matches!(
        &records[0].entry,
        JournalEntry::RunStarted { fingerprint, plate_count: 1, .. } if *fingerprint == run.fingerprint
    ));
    assert_eq!(
        records.last().map(|r| &r.entry),
        Some(&JournalEntry::RunFinished {
            commands: run.ops.len()
        })
    );
    let paused = records
        .iter()
        .filter(|r| matches!(r.entry, JournalEntry::Paused { .. }))
        .count();
    assert_eq!(paused, run.pause_count());

    let _ = fs::remove_file(&path);
}

#[test]
fn test_journaled_failure_is_recorded() {
    let path = temp_journal("journaled_failure");
    let run = plan(&ProtocolConfig::from_yaml("plates: [{first: 1, last: 1}]").unwrap()).unwrap();

    let writer = JournalWriter::open(&path).unwrap();
    let mut driver = JournaledDriver::new(RecordingDriver::failing_at(10), writer);
    assert!(execute_plan(&run, &mut driver).is_err());

    let records = JournalReader::open(&path).unwrap().read_all().unwrap();
    // Start, ten accepted commands, the failure.
    assert_eq!(records.len(), 12);
    assert!(matches!(
        records[11].entry,
        JournalEntry::RunFailed { index: 10, .. }
    ));

    let _ = fs::remove_file(&path);
}

#[test]
fn test_console_driver_waits_for_operator() {
    let mut driver = ConsoleDriver::new(Cursor::new(b"\n".to_vec()), Vec::new(), false);
    driver
        .execute(&DeviceOp::Comment {
            message: "hello".into(),
        })
        .unwrap();
    driver.pause("Load plates").expect("first barrier is acknowledged");
    let err = driver.pause("Second barrier").unwrap_err();
    assert!(err.to_string().contains("Second barrier"));

    let output = String::from_utf8(driver.into_output()).unwrap();
    assert!(output.contains("# hello"));
    assert!(output.contains("PAUSE: Load plates"));
}

#[test]
fn test_console_driver_auto_ack() {
    let mut driver = ConsoleDriver::new(Cursor::new(Vec::new()), Vec::new(), true);
    for i in 0..3 {
        driver.pause(&format!("barrier {i}")).unwrap();
    }
    let output = String::from_utf8(driver.into_output()).unwrap();
    assert_eq!(output.matches("PAUSE:").count(), 3);
}
