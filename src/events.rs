use crate::error::EventBusError;
use crate::ledger::LedgerColumn;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Corner points of a detected symbol, in frame pixel coordinates
pub type Polygon = Vec<(i32, i32)>;

/// Events that can occur in the attendance system.
///
/// Presentation layers subscribe to these; the engine never calls back into
/// them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AttendanceEvent {
    /// A ledger finished loading and replaced the previous one
    LedgerLoaded {
        path: String,
        column: Option<LedgerColumn>,
        roster_size: usize,
    },
    /// Present/absent/total counters changed
    CountersChanged {
        present: usize,
        absent: usize,
        total: usize,
    },
    /// A scan passed validation, roster lookup and every dedup gate
    ScanAccepted {
        identity: String,
        timestamp: SystemTime,
    },
    /// An accepted scan was written to the ledger
    ScanPersisted { identity: String },
    /// The ledger was held by another process; the scan was not written
    PersistConflict { identity: String },
    /// Symbol outlines found in a frame, for overlay drawing only
    SymbolsDetected {
        frame_id: u64,
        polygons: Vec<Polygon>,
    },
    /// Camera connection status changed
    CameraStatusChanged {
        connected: bool,
        timestamp: SystemTime,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl AttendanceEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            AttendanceEvent::LedgerLoaded {
                path,
                column,
                roster_size,
            } => match column {
                Some(column) => format!(
                    "Ledger {} loaded: {} learners, marking column {}",
                    path, roster_size, column.column_index
                ),
                None => format!(
                    "Ledger {} loaded: {} learners, today's column not found",
                    path, roster_size
                ),
            },
            AttendanceEvent::CountersChanged {
                present,
                absent,
                total,
            } => format!("Present {} / Absent {} / Total {}", present, absent, total),
            AttendanceEvent::ScanAccepted { identity, .. } => format!("Scanned: {}", identity),
            AttendanceEvent::ScanPersisted { identity } => format!("Saved: {}", identity),
            AttendanceEvent::PersistConflict { identity } => format!(
                "Ledger is open in another program; {} was not saved",
                identity
            ),
            AttendanceEvent::SymbolsDetected { frame_id, polygons } => {
                format!("{} symbol(s) in frame {}", polygons.len(), frame_id)
            }
            AttendanceEvent::CameraStatusChanged { connected, .. } => {
                format!(
                    "Camera {}",
                    if *connected {
                        "connected"
                    } else {
                        "disconnected"
                    }
                )
            }
            AttendanceEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            AttendanceEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            AttendanceEvent::LedgerLoaded { .. } => "ledger_loaded",
            AttendanceEvent::CountersChanged { .. } => "counters_changed",
            AttendanceEvent::ScanAccepted { .. } => "scan_accepted",
            AttendanceEvent::ScanPersisted { .. } => "scan_persisted",
            AttendanceEvent::PersistConflict { .. } => "persist_conflict",
            AttendanceEvent::SymbolsDetected { .. } => "symbols_detected",
            AttendanceEvent::CameraStatusChanged { .. } => "camera_status_changed",
            AttendanceEvent::SystemError { .. } => "system_error",
            AttendanceEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AttendanceEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<AttendanceEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers.
    ///
    /// Never blocks. Returns the number of subscribers reached; zero
    /// subscribers is not an error.
    pub fn publish(&self, event: AttendanceEvent) -> usize {
        match &event {
            AttendanceEvent::LedgerLoaded { .. } | AttendanceEvent::ScanAccepted { .. } => {
                info!("{}", event.description());
            }
            AttendanceEvent::PersistConflict { .. } => {
                warn!("{}", event.description());
            }
            AttendanceEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            AttendanceEvent::CameraStatusChanged { connected, .. } => {
                if *connected {
                    info!("Camera connected");
                } else {
                    warn!("Camera disconnected");
                }
            }
            AttendanceEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {}
        }

        // send() only fails when nobody is listening
        self.sender.send(event).unwrap_or(0)
    }
}

/// Which events a presentation consumer wants to see
#[derive(Debug, Clone)]
pub struct EventFilter {
    event_types: Vec<&'static str>,
}

impl EventFilter {
    /// Accept only events whose `event_type()` is listed
    pub fn event_types(event_types: &[&'static str]) -> Self {
        Self {
            event_types: event_types.to_vec(),
        }
    }

    /// Check if an event passes this filter
    pub fn matches(&self, event: &AttendanceEvent) -> bool {
        self.event_types.contains(&event.event_type())
    }
}

/// Event receiver with filtering capabilities
pub struct EventReceiver {
    receiver: broadcast::Receiver<AttendanceEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<AttendanceEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event.
    ///
    /// Lagging is logged and skipped over; presentation consumers only need
    /// the most recent state.
    pub async fn recv(&mut self) -> Result<AttendanceEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

/// Drain every event currently buffered for a raw receiver
pub fn drain(receiver: &mut broadcast::Receiver<AttendanceEvent>) -> Vec<AttendanceEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
