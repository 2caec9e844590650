use super::*;
use crate::error::LedgerError;
use crate::events::{drain, AttendanceEvent, EventBus};
use crate::session::ScanEvent;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

struct AlwaysLocked;

impl LockProbe for AlwaysLocked {
    fn is_locked(&self, _path: &Path) -> bool {
        true
    }
}

fn loader() -> LedgerLoader {
    LedgerLoader::new(
        LedgerLayout::default(),
        Arc::new(StandardIdentityValidator::new(["LEARNER'S NAME", "TOTAL"])),
    )
}

/// Days 5..=8 in columns 3..=6, Alice and Bob on rows 13 and 14, Bob marked on day 7
fn sample_sheet() -> MemoryLedger {
    MemoryLedger::new()
        .with_cell(11, 3, "5")
        .with_cell(11, 4, "6")
        .with_cell(11, 5, "7")
        .with_cell(11, 6, "8")
        .with_cell(12, 3, "M")
        .with_cell(12, 4, "T")
        .with_cell(12, 5, "W")
        .with_cell(12, 6, "TH")
        .with_cell(12, 2, "LEARNER'S NAME")
        .with_cell(13, 1, "1001")
        .with_cell(13, 2, "Alice")
        .with_cell(14, 1, "1002")
        .with_cell(14, 2, " Bob ")
        .with_cell(14, 5, " ✓ ")
        .with_cell(15, 2, "TOTAL")
        .with_cell(16, 2, "12/05/2026")
        .with_cell(17, 2, "")
}

fn scan(identity: &str) -> ScanEvent {
    ScanEvent {
        identity: identity.to_string(),
        timestamp: SystemTime::now(),
    }
}

fn writer_for(sheet: MemoryLedger, day: u32, bus: Arc<EventBus>) -> LedgerWriter {
    let snapshot = loader().load_sheet(&sheet, day);
    LedgerWriter::new(
        "memory.xlsx".into(),
        Box::new(sheet),
        snapshot.column,
        Arc::new(snapshot.roster),
        "✓",
        bus,
    )
    .with_probe(Box::new(NoLockProbe))
}

#[test]
fn test_resolve_column_picks_matching_day() {
    let sheet = sample_sheet();
    let column = loader().resolve_column(&sheet, 7).unwrap();

    // Third of the four day columns
    assert_eq!(column.column_index, 5);
    assert_eq!(column.day_code, "W");
    assert_eq!(column.day_of_month, 7);
}

#[test]
fn test_resolve_column_first_match_wins_and_floats_count() {
    let sheet = MemoryLedger::new()
        .with_cell(11, 2, "x")
        .with_cell(11, 3, "9.0")
        .with_cell(11, 4, "9");

    let column = loader().resolve_column(&sheet, 9).unwrap();
    assert_eq!(column.column_index, 3);
    assert_eq!(column.day_code, "");
}

#[test]
fn test_resolve_column_unresolved() {
    assert!(loader().resolve_column(&sample_sheet(), 30).is_none());
    assert!(loader().resolve_column(&MemoryLedger::new(), 1).is_none());
}

#[test]
fn test_load_sheet_roster_and_marks() {
    let snapshot = loader().load_sheet(&sample_sheet(), 7);

    let identities: Vec<_> = snapshot.roster.iter().map(|e| e.identity.as_str()).collect();
    assert_eq!(identities, vec!["Alice", "Bob"]);

    let bob = snapshot.roster.get("Bob").unwrap();
    assert_eq!(bob.external_id, "1002");
    assert_eq!(bob.row_index, 14);

    assert!(!snapshot.marks.is_marked("Alice"));
    assert!(snapshot.marks.is_marked("Bob"));
    assert_eq!(snapshot.marks.present_count(), 1);
}

#[test]
fn test_load_sheet_unresolved_still_loads_roster() {
    let snapshot = loader().load_sheet(&sample_sheet(), 30);

    assert!(snapshot.column.is_none());
    assert_eq!(snapshot.roster.len(), 2);
    assert!(snapshot.marks.is_empty());
}

#[test]
fn test_load_sheet_duplicate_identity_keeps_first() {
    let sheet = sample_sheet().with_cell(18, 2, "Alice").with_cell(18, 5, "✓");
    let snapshot = loader().load_sheet(&sheet, 7);

    assert_eq!(snapshot.roster.len(), 2);
    assert_eq!(snapshot.roster.get("Alice").unwrap().row_index, 13);
    assert!(!snapshot.marks.is_marked("Alice"));
}

#[test]
fn test_mark_requires_exact_glyph() {
    let sheet = sample_sheet().with_cell(13, 5, "✓✓");
    let snapshot = loader().load_sheet(&sheet, 7);
    assert!(!snapshot.marks.is_marked("Alice"));
}

#[test]
fn test_persist_writes_glyph() {
    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();
    let mut writer = writer_for(sample_sheet(), 7, Arc::clone(&bus));

    let outcome = writer.persist(&scan("Alice")).unwrap();

    assert_eq!(outcome, PersistOutcome::Persisted);
    assert_eq!(writer.document().cell_text(13, 5).as_deref(), Some("✓"));
    assert_eq!(writer.stats().persisted, 1);
    assert!(matches!(
        drain(&mut events).as_slice(),
        [AttendanceEvent::ScanPersisted { identity }] if identity == "Alice"
    ));
}

#[test]
fn test_persist_conflict_reports_once_and_writes_nothing() {
    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();
    let mut writer =
        writer_for(sample_sheet(), 7, Arc::clone(&bus)).with_probe(Box::new(AlwaysLocked));

    let outcome = writer.persist(&scan("Alice")).unwrap();

    assert_eq!(outcome, PersistOutcome::Conflict);
    assert_eq!(writer.document().cell_text(13, 5), None);
    assert_eq!(writer.stats().conflicts, 1);
    assert_eq!(writer.stats().persisted, 0);

    let conflicts: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, AttendanceEvent::PersistConflict { .. }))
        .collect();
    assert_eq!(conflicts.len(), 1);
}

#[test]
fn test_persist_unresolved_is_noop() {
    let bus = Arc::new(EventBus::new(16));
    let mut writer = writer_for(sample_sheet(), 30, bus).with_probe(Box::new(AlwaysLocked));

    // Unresolved short-circuits before the lock probe
    assert_eq!(writer.persist(&scan("Alice")).unwrap(), PersistOutcome::Unresolved);
    assert_eq!(writer.stats().conflicts, 0);
    assert_eq!(writer.stats().unresolved, 1);
}

#[test]
fn test_persist_unknown_identity() {
    let bus = Arc::new(EventBus::new(16));
    let mut writer = writer_for(sample_sheet(), 7, bus);
    assert_eq!(
        writer.persist(&scan("Mallory")).unwrap(),
        PersistOutcome::UnknownIdentity
    );
}

#[test]
fn test_persist_save_failure_is_error() {
    let bus = Arc::new(EventBus::new(16));
    let mut writer = writer_for(sample_sheet().failing_saves(), 7, bus);

    let result = writer.persist(&scan("Alice"));
    assert!(matches!(result, Err(LedgerError::Write { .. })));
    assert_eq!(writer.stats().failures, 1);
}

#[tokio::test]
async fn test_spawned_writer_serializes_events() {
    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();
    let writer = writer_for(sample_sheet(), 7, Arc::clone(&bus));

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = writer.spawn(rx);

    tx.send(scan("Alice")).unwrap();
    tx.send(scan("Bob")).unwrap();
    drop(tx);

    let stats = handle.await.unwrap();
    assert_eq!(stats.persisted, 2);

    let persisted: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            AttendanceEvent::ScanPersisted { identity } => Some(identity),
            _ => None,
        })
        .collect();
    assert_eq!(persisted, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn test_spawned_writer_reports_save_failures() {
    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();
    let writer = writer_for(sample_sheet().failing_saves(), 7, Arc::clone(&bus));

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = writer.spawn(rx);
    tx.send(scan("Alice")).unwrap();
    drop(tx);

    let stats = handle.await.unwrap();
    assert_eq!(stats.failures, 1);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, AttendanceEvent::SystemError { component, .. } if component == "ledger_writer")));
}

#[test]
fn test_rename_probe() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.xlsx");
    fs::write(&path, b"data").unwrap();

    assert!(!RenameProbe.is_locked(&path));
    assert_eq!(fs::read(&path).unwrap(), b"data");
    assert!(!dir.path().join("ledger.xlsx.tmp").exists());

    assert!(RenameProbe.is_locked(&dir.path().join("missing.xlsx")));
}

#[test]
fn test_no_lock_probe_leaves_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.xlsx");

    assert!(!NoLockProbe.is_locked(&missing));
    assert!(!missing.exists());
    assert!(!dir.path().join("missing.xlsx.tmp").exists());
}

fn write_workbook(path: &Path) {
    let mut book = umya_spreadsheet::new_file();
    let sheet = book.get_active_sheet_mut();
    for (offset, day) in [5, 6, 7, 8].into_iter().enumerate() {
        sheet.get_cell_mut((3 + offset as u32, 11)).set_value_number(day);
    }
    sheet.get_cell_mut((5, 12)).set_value("W");
    sheet.get_cell_mut((1, 13)).set_value("1001");
    sheet.get_cell_mut((2, 13)).set_value("Alice");
    sheet.get_cell_mut((1, 14)).set_value("1002");
    sheet.get_cell_mut((2, 14)).set_value("Bob");
    sheet.get_cell_mut((5, 14)).set_value("✓");
    umya_spreadsheet::writer::xlsx::write(&book, path).unwrap();
}

#[test]
fn test_xlsx_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("class.xlsx");
    write_workbook(&path);

    let loaded = loader().open(&path, 7).unwrap();
    assert_eq!(loaded.snapshot.column.as_ref().unwrap().column_index, 5);
    assert!(!loaded.snapshot.marks.is_marked("Alice"));
    assert!(loaded.snapshot.marks.is_marked("Bob"));

    let bus = Arc::new(EventBus::new(16));
    let mut writer = LedgerWriter::new(
        loaded.path.clone(),
        loaded.document,
        loaded.snapshot.column,
        Arc::new(loaded.snapshot.roster),
        "✓",
        bus,
    );
    assert_eq!(writer.persist(&scan("Alice")).unwrap(), PersistOutcome::Persisted);

    let reloaded = loader().open(&path, 7).unwrap();
    assert!(reloaded.snapshot.marks.is_marked("Alice"));
    assert_eq!(reloaded.snapshot.marks.present_count(), 2);
}

#[test]
fn test_open_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = loader().open(&dir.path().join("none.xlsx"), 7);
    assert!(matches!(result, Err(LedgerError::NotFound { .. })));
}

#[test]
fn test_open_garbage_fails_repair() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.xlsx");
    fs::write(&path, b"definitely not a zip").unwrap();

    let result = loader().open(&path, 7);
    assert!(matches!(result, Err(LedgerError::RepairFailed { .. })));
    assert_eq!(fs::read(&path).unwrap(), b"definitely not a zip");
}

#[test]
fn test_open_garbage_without_repair() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.xlsx");
    fs::write(&path, b"nope").unwrap();

    let result = loader().with_repair(false, false).open(&path, 7);
    assert!(matches!(result, Err(LedgerError::Unreadable { .. })));
}

#[test]
fn test_repair_requires_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no_manifest.xlsx");
    {
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("hello.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"hi").unwrap();
        zip.finish().unwrap();
    }

    let result = repair_container(&path, false);
    assert!(matches!(result, Err(LedgerError::RepairFailed { .. })));
}

#[test]
fn test_repair_repacks_valid_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("class.xlsx");
    write_workbook(&path);
    let original = fs::read(&path).unwrap();

    let report = repair_container(&path, true).unwrap();

    assert!(report.entries > 0);
    let backup = report.backup.unwrap();
    assert_eq!(fs::read(&backup).unwrap(), original);

    let loaded = loader().open(&path, 7).unwrap();
    assert_eq!(loaded.snapshot.roster.len(), 2);
}

#[test]
fn test_read_only_ledger_never_saves() {
    let inner = sample_sheet().failing_saves();
    let mut sheet = ReadOnlyLedger::new(Box::new(inner));

    sheet.set_cell_text(13, 5, "✓");
    assert!(sheet.save().is_ok());
    assert_eq!(sheet.cell_text(13, 5).as_deref(), Some("✓"));
    assert_eq!(sheet.max_column(), 6);
}
