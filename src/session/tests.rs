use super::*;
use crate::events::{drain, AttendanceEvent, EventBus};
use crate::frame::{FrameData, FrameFormat};
use crate::frame_slot;
use crate::ledger::{HistoricalMarks, Roster, RosterEntry, StandardIdentityValidator};
use image::GrayImage;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Returns one scripted batch of payloads per decode call
struct ScriptedDecoder {
    batches: Mutex<VecDeque<Vec<&'static str>>>,
}

impl ScriptedDecoder {
    fn new(batches: Vec<Vec<&'static str>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }
}

impl SymbolDecoder for ScriptedDecoder {
    fn decode(&self, _image: &GrayImage) -> Vec<DecodedSymbol> {
        self.batches
            .lock()
            .pop_front()
            .unwrap_or_default()
            .into_iter()
            .map(|payload| DecodedSymbol {
                payload: Some(payload.to_string()),
                polygon: vec![(0, 0), (10, 0), (10, 10), (0, 10)],
            })
            .collect()
    }
}

fn roster(names: &[&str]) -> Arc<Roster> {
    Arc::new(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| RosterEntry {
                identity: name.to_string(),
                external_id: format!("{}", 1000 + i),
                row_index: 13 + i as u32,
            })
            .collect(),
    )
}

fn alice_bob_state() -> SessionState {
    let marks: HistoricalMarks = [("Alice", false), ("Bob", true)].into_iter().collect();
    SessionState::new(
        roster(&["Alice", "Bob"]),
        marks,
        Arc::new(StandardIdentityValidator::new(["TOTAL"])),
        Duration::from_secs(1),
    )
}

fn frame(id: u64) -> FrameData {
    FrameData::new(id, SystemTime::now(), vec![255u8; 64], 8, 8, FrameFormat::Gray8)
}

#[test]
fn test_alice_bob_scenario() {
    let mut state = alice_bob_state();
    let t0 = Instant::now();

    let first = state.evaluate("Alice", t0);
    let second = state.evaluate("Alice", t0 + Duration::from_millis(200));
    let bob = state.evaluate("Bob", t0 + Duration::from_millis(300));

    assert!(first.is_accepted());
    assert!(!second.is_accepted());
    assert_eq!(bob, ScanOutcome::HistoricalDuplicate);

    assert_eq!(state.scan_log().len(), 1);
    assert_eq!(
        state.counters(),
        AttendanceCounters {
            present: 2,
            absent: 0,
            total: 2
        }
    );
}

#[test]
fn test_session_duplicate_after_cooldown() {
    let mut state = alice_bob_state();
    let t0 = Instant::now();

    assert!(state.evaluate("Alice", t0).is_accepted());
    assert_eq!(
        state.evaluate("Alice", t0 + Duration::from_secs(5)),
        ScanOutcome::SessionDuplicate
    );
}

#[test]
fn test_ignored_payloads() {
    let mut state = alice_bob_state();
    let now = Instant::now();

    assert_eq!(
        state.evaluate("12345", now),
        ScanOutcome::Ignored(IgnoreReason::Invalid)
    );
    assert_eq!(
        state.evaluate("TOTAL", now),
        ScanOutcome::Ignored(IgnoreReason::Invalid)
    );
    assert_eq!(
        state.evaluate("Mallory", now),
        ScanOutcome::Ignored(IgnoreReason::NotOnRoster)
    );
    assert!(state.scan_log().is_empty());
}

#[test]
fn test_payload_is_trimmed() {
    let mut state = alice_bob_state();
    match state.evaluate("  Alice\n", Instant::now()) {
        ScanOutcome::Accepted(event) => assert_eq!(event.identity, "Alice"),
        other => panic!("Expected acceptance, got {:?}", other),
    }
    assert!(state.is_present("Alice"));
}

#[test]
fn test_counter_invariants_hold_over_scan_sequence() {
    let names = ["Ana", "Ben", "Cy", "Dee", "Eve"];
    let marks: HistoricalMarks = [("Ana", true), ("Ben", false), ("Cy", true)]
        .into_iter()
        .collect();
    let mut state = SessionState::new(
        roster(&names),
        marks.clone(),
        Arc::new(StandardIdentityValidator::default()),
        Duration::from_secs(1),
    );

    let sequence = [
        "Ben", "Ben", "Ana", "Dee", "Zed", "Cy", "Ben", "Eve", "Dee", "Ana", "Eve",
    ];
    let t0 = Instant::now();
    for (i, payload) in sequence.iter().enumerate() {
        state.evaluate(payload, t0 + Duration::from_millis(150 * i as u64));

        let log = state.scan_log();
        let unique: HashSet<_> = log.iter().map(|e| e.identity.as_str()).collect();
        assert_eq!(unique.len(), log.len());
        assert!(log.iter().all(|e| !marks.is_marked(&e.identity)));

        let counters = state.counters();
        assert_eq!(counters.present, marks.present_count() + log.len());
        assert_eq!(counters.present + counters.absent, counters.total);
    }

    let accepted: Vec<_> = state.scan_log().iter().map(|e| e.identity.as_str()).collect();
    assert_eq!(accepted, vec!["Ben", "Dee", "Eve"]);
}

#[test]
fn test_process_frame_publishes_events() {
    let bus = Arc::new(EventBus::new(32));
    let mut events = bus.subscribe();
    let decoder = ScriptedDecoder::new(vec![vec!["Alice", "Alice", "Bob", "noise 123"]]);
    let mut scanner = Scanner::new(alice_bob_state(), Box::new(decoder), Arc::clone(&bus));

    let accepted = scanner.process_frame(&frame(1), Instant::now());

    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].identity, "Alice");

    let published = drain(&mut events);
    let types: Vec<_> = published.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec!["symbols_detected", "scan_accepted", "counters_changed"]
    );
    assert!(matches!(
        &published[2],
        AttendanceEvent::CountersChanged {
            present: 2,
            absent: 0,
            total: 2
        }
    ));
}

#[test]
fn test_process_frame_decodes_real_qr_against_roster() {
    let bus = Arc::new(EventBus::new(32));
    let mut events = bus.subscribe();
    let state = SessionState::new(
        roster(&["DELA CRUZ, JUAN P.", "Bob"]),
        HistoricalMarks::default(),
        Arc::new(StandardIdentityValidator::default()),
        Duration::from_secs(1),
    );
    let mut scanner = Scanner::new(state, Box::new(QrDecoder), Arc::clone(&bus));

    let image = super::decoder::render_qr("DELA CRUZ, JUAN P.", 6);
    let frame = FrameData::from_luma(7, SystemTime::now(), image);

    let accepted = scanner.process_frame(&frame, Instant::now());
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].identity, "DELA CRUZ, JUAN P.");
    assert_eq!(scanner.state().counters().present, 1);

    let published = drain(&mut events);
    match &published[0] {
        AttendanceEvent::SymbolsDetected { frame_id, polygons } => {
            assert_eq!(*frame_id, 7);
            assert_eq!(polygons.len(), 1);
            assert_eq!(polygons[0].len(), 4);
        }
        other => panic!("Unexpected event {:?}", other),
    }
}

#[test]
fn test_process_frame_without_overlays() {
    let bus = Arc::new(EventBus::new(32));
    let mut events = bus.subscribe();
    let decoder = ScriptedDecoder::new(vec![vec!["Mallory"]]);
    let mut scanner =
        Scanner::new(alice_bob_state(), Box::new(decoder), Arc::clone(&bus)).with_overlays(false);

    assert!(scanner.process_frame(&frame(1), Instant::now()).is_empty());
    assert!(drain(&mut events).is_empty());
}

#[test]
fn test_process_frame_skips_malformed_frames() {
    let bus = Arc::new(EventBus::new(32));
    let decoder = ScriptedDecoder::new(vec![vec!["Alice"]]);
    let mut scanner = Scanner::new(alice_bob_state(), Box::new(decoder), bus);

    let broken = FrameData::new(1, SystemTime::now(), vec![0u8; 3], 8, 8, FrameFormat::Gray8);
    assert!(scanner.process_frame(&broken, Instant::now()).is_empty());
    assert!(scanner.state().scan_log().is_empty());
}

#[tokio::test]
async fn test_run_ends_on_disconnect_and_queues_writes() {
    let bus = Arc::new(EventBus::new(32));
    let decoder = ScriptedDecoder::new(vec![vec!["Alice"]]);
    let scanner = Scanner::new(alice_bob_state(), Box::new(decoder), bus);

    let (producer, consumer) = frame_slot::channel();
    producer.push(frame(1));
    drop(producer);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = scanner
        .run(consumer, tx, Duration::from_millis(5), CancellationToken::new())
        .await;

    assert_eq!(summary.end, SessionEnd::SourceDisconnected);
    assert_eq!(summary.frames_processed, 1);
    assert_eq!(summary.symbols_decoded, 1);
    assert_eq!(summary.accepted.len(), 1);
    assert_eq!(summary.counters.present, 2);
    assert_eq!(summary.slot.frames_taken, 1);

    let queued = rx.recv().await.unwrap();
    assert_eq!(queued.identity, "Alice");
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let bus = Arc::new(EventBus::new(32));
    let scanner = Scanner::new(
        alice_bob_state(),
        Box::new(ScriptedDecoder::new(vec![])),
        bus,
    );

    let (_producer, consumer) = frame_slot::channel();
    let (tx, _rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();

    let handle = tokio::spawn(scanner.run(consumer, tx, Duration::from_millis(5), token.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.end, SessionEnd::Stopped);
    assert!(summary.accepted.is_empty());
}
