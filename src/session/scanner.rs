use super::decoder::SymbolDecoder;
use super::state::{AttendanceCounters, IgnoreReason, ScanEvent, ScanOutcome, SessionState};
use crate::events::{AttendanceEvent, EventBus, Polygon};
use crate::frame::FrameData;
use crate::frame_slot::{FrameConsumer, FrameSlotStatsSnapshot, SlotTake};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Why a scanning session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Cancelled by the caller
    Stopped,
    /// The acquisition side went away
    SourceDisconnected,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub accepted: Vec<ScanEvent>,
    pub counters: AttendanceCounters,
    pub frames_processed: u64,
    pub symbols_decoded: u64,
    pub slot: FrameSlotStatsSnapshot,
    pub end: SessionEnd,
}

/// Consumer side of the pipeline: frames in, accepted scans out.
///
/// Decoding runs inline on the task that polls the slot. Sized for webcam
/// frames (640x480 grayscale decodes in a few milliseconds); larger sources
/// should be downscaled before the slot rather than decoded here.
pub struct Scanner {
    session_id: Uuid,
    started_at: SystemTime,
    state: SessionState,
    decoder: Box<dyn SymbolDecoder>,
    event_bus: Arc<EventBus>,
    publish_overlays: bool,
    frames_processed: u64,
    symbols_decoded: u64,
}

impl Scanner {
    pub fn new(
        state: SessionState,
        decoder: Box<dyn SymbolDecoder>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: SystemTime::now(),
            state,
            decoder,
            event_bus,
            publish_overlays: true,
            frames_processed: 0,
            symbols_decoded: 0,
        }
    }

    pub fn with_overlays(mut self, enabled: bool) -> Self {
        self.publish_overlays = enabled;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Decode one frame and run every payload through the session gates.
    ///
    /// Returns the scans accepted from this frame, in decode order.
    pub fn process_frame(&mut self, frame: &FrameData, now: Instant) -> Vec<ScanEvent> {
        self.frames_processed += 1;

        let image = match frame.to_luma() {
            Ok(image) => image,
            Err(e) => {
                trace!("Skipping frame {}: {}", frame.id, e);
                return Vec::new();
            }
        };

        let symbols = self.decoder.decode(&image);
        if symbols.is_empty() {
            return Vec::new();
        }

        if self.publish_overlays {
            let polygons: Vec<Polygon> = symbols.iter().map(|s| s.polygon.clone()).collect();
            self.event_bus.publish(AttendanceEvent::SymbolsDetected {
                frame_id: frame.id,
                polygons,
            });
        }

        let mut accepted = Vec::new();
        for payload in symbols.into_iter().filter_map(|s| s.payload) {
            self.symbols_decoded += 1;

            match self.state.evaluate(&payload, now) {
                ScanOutcome::Accepted(event) => {
                    info!("Accepted scan for '{}'", event.identity);
                    self.event_bus.publish(AttendanceEvent::ScanAccepted {
                        identity: event.identity.clone(),
                        timestamp: event.timestamp,
                    });
                    self.publish_counters();
                    accepted.push(event);
                }
                ScanOutcome::HistoricalDuplicate => {
                    debug!("'{}' already marked present in the ledger", payload.trim());
                }
                ScanOutcome::SessionDuplicate => {
                    debug!("'{}' already scanned this session", payload.trim());
                }
                ScanOutcome::CooldownSuppressed => {
                    trace!("'{}' inside cooldown window", payload.trim());
                }
                ScanOutcome::Ignored(IgnoreReason::Invalid) => {
                    trace!("Ignoring non-identity payload");
                }
                ScanOutcome::Ignored(IgnoreReason::NotOnRoster) => {
                    trace!("Ignoring '{}': not on roster", payload.trim());
                }
            }
        }

        accepted
    }

    pub fn publish_counters(&self) {
        let counters = self.state.counters();
        self.event_bus.publish(AttendanceEvent::CountersChanged {
            present: counters.present,
            absent: counters.absent,
            total: counters.total,
        });
    }

    /// Poll the frame slot until cancelled or the producer disconnects.
    ///
    /// Accepted scans are queued to `writes` in acceptance order.
    pub async fn run(
        mut self,
        frames: FrameConsumer,
        writes: mpsc::UnboundedSender<ScanEvent>,
        poll_interval: Duration,
        token: CancellationToken,
    ) -> SessionSummary {
        info!(
            "Scanner session {} started ({} on roster)",
            self.session_id,
            self.state.roster().len()
        );
        self.publish_counters();

        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let end = loop {
            tokio::select! {
                _ = token.cancelled() => break SessionEnd::Stopped,
                _ = interval.tick() => {
                    match frames.try_take() {
                        SlotTake::Frame(frame) => {
                            for event in self.process_frame(&frame, Instant::now()) {
                                if writes.send(event).is_err() {
                                    warn!("Ledger writer is gone; scan kept in session only");
                                }
                            }
                        }
                        SlotTake::Empty => {}
                        SlotTake::Disconnected => {
                            warn!("Frame source disconnected, ending scan session");
                            break SessionEnd::SourceDisconnected;
                        }
                    }
                }
            }
        };

        let summary = self.summary(end, frames.stats());
        info!(
            "Scanner session {} ended ({:?}): {} accepted, {} frames, present {}/{}",
            summary.session_id,
            summary.end,
            summary.accepted.len(),
            summary.frames_processed,
            summary.counters.present,
            summary.counters.total
        );
        summary
    }

    pub fn summary(&self, end: SessionEnd, slot: FrameSlotStatsSnapshot) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            started_at: self.started_at,
            ended_at: SystemTime::now(),
            accepted: self.state.scan_log().to_vec(),
            counters: self.state.counters(),
            frames_processed: self.frames_processed,
            symbols_decoded: self.symbols_decoded,
            slot,
            end,
        }
    }
}
