use super::shutdown::{SCANNER_STOP_TIMEOUT, WRITER_DRAIN_TIMEOUT};
use super::types::{ComponentState, ShutdownReason};
use crate::camera::{FrameAcquisition, VideoSource};
use crate::config::AttendanceConfig;
use crate::error::{AttendanceError, Result};
use crate::events::{AttendanceEvent, EventBus};
use crate::ledger::{
    day_of_month, find_ledgers, HistoricalMarks, LedgerColumn, LedgerLoader, LedgerSheet,
    ReadOnlyLedger, Roster, WriterStats,
};
use crate::report::RosterReport;
use crate::session::{SessionSummary, SymbolDecoder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// What the current ledger load produced, minus the document itself
#[derive(Debug, Clone)]
pub struct LedgerState {
    pub path: PathBuf,
    pub column: Option<LedgerColumn>,
    pub roster: Arc<Roster>,
    pub marks: HistoricalMarks,
    /// Loaded for a dry run: saves and lock probes are skipped
    pub read_only: bool,
}

pub(super) struct ActiveSession {
    pub(super) acquisition: FrameAcquisition,
    pub(super) scanner: JoinHandle<SessionSummary>,
    pub(super) writer: JoinHandle<WriterStats>,
    /// Cancelled when the scanner loop returns on its own
    pub(super) ended: CancellationToken,
}

/// Owns the ledger and drives one scanning session at a time
pub struct AttendanceOrchestrator {
    pub(super) config: AttendanceConfig,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) loader: LedgerLoader,
    pub(super) dry_run: bool,

    // Ledger
    pub(super) ledger: Option<LedgerState>,
    pub(super) document: Option<Box<dyn LedgerSheet>>,

    // Session components
    pub(super) video_source: Option<Box<dyn VideoSource>>,
    pub(super) decoder: Option<Box<dyn SymbolDecoder>>,
    pub(super) session: Option<ActiveSession>,
    pub(super) last_summary: Option<SessionSummary>,
    pub(super) last_writer_stats: Option<WriterStats>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
    pub(super) scanner_stop_timeout: Duration,
    pub(super) writer_drain_timeout: Duration,
}

impl AttendanceOrchestrator {
    /// Create a new orchestrator with the given configuration
    pub fn new(config: AttendanceConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let loader = LedgerLoader::from_config(&config.ledger);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            event_bus,
            loader,
            dry_run: false,
            ledger: None,
            document: None,
            video_source: None,
            decoder: None,
            session: None,
            last_summary: None,
            last_writer_stats: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
            scanner_stop_timeout: SCANNER_STOP_TIMEOUT,
            writer_drain_timeout: WRITER_DRAIN_TIMEOUT,
        })
    }

    /// Use this source for the next session instead of the configured one
    pub fn with_video_source(mut self, source: Box<dyn VideoSource>) -> Self {
        self.video_source = Some(source);
        self
    }

    /// Use this decoder for the next session instead of QR decoding
    pub fn with_decoder(mut self, decoder: Box<dyn SymbolDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Scan and count without ever saving the ledger. Applies to the next load.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn config(&self) -> &AttendanceConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn ledger(&self) -> Option<&LedgerState> {
        self.ledger.as_ref()
    }

    pub fn is_scanning(&self) -> bool {
        self.session.is_some()
    }

    pub fn last_summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    pub fn last_writer_stats(&self) -> Option<&WriterStats> {
        self.last_writer_stats.as_ref()
    }

    /// Explicit path, then the configured path, then the first workbook in the active folder
    pub fn resolve_ledger_path(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = &self.config.ledger.path {
            return Ok(PathBuf::from(path));
        }

        let dir = Path::new(&self.config.ledger.active_dir);
        let found = find_ledgers(dir)?;
        found.into_iter().next().map(|info| info.path).ok_or_else(|| {
            AttendanceError::system(format!("No ledger workbook found in {}", dir.display()))
        })
    }

    /// Load a ledger and replace the current one.
    ///
    /// On failure the previously loaded ledger stays in place.
    pub async fn load_ledger(&mut self, path: Option<&Path>) -> Result<()> {
        if self.session.is_some() {
            return Err(AttendanceError::system(
                "Cannot reload the ledger while a session is running",
            ));
        }

        let path = self.resolve_ledger_path(path)?;
        let day = day_of_month(self.config.ledger.tz());
        let loader = self.loader.clone();

        self.set_component_state("ledger", ComponentState::Starting)
            .await;

        let result = tokio::task::spawn_blocking(move || loader.open(&path, day))
            .await
            .map_err(|e| AttendanceError::system(format!("Ledger load task failed: {}", e)))?;

        let loaded = match result {
            Ok(loaded) => loaded,
            Err(e) => {
                let state = if self.ledger.is_some() {
                    ComponentState::Running
                } else {
                    ComponentState::Failed
                };
                self.set_component_state("ledger", state).await;
                return Err(e.into());
            }
        };

        let state = LedgerState {
            path: loaded.path,
            column: loaded.snapshot.column,
            roster: Arc::new(loaded.snapshot.roster),
            marks: loaded.snapshot.marks,
            read_only: self.dry_run,
        };
        let document: Box<dyn LedgerSheet> = if self.dry_run {
            Box::new(ReadOnlyLedger::new(loaded.document))
        } else {
            loaded.document
        };
        self.document = Some(document);

        info!(
            "Ledger {} loaded: {} learners, {} already present{}",
            state.path.display(),
            state.roster.len(),
            state.marks.present_count(),
            if self.dry_run { " (dry run)" } else { "" }
        );

        let total = state.roster.len();
        let present = state.marks.present_count();
        self.event_bus.publish(AttendanceEvent::LedgerLoaded {
            path: state.path.display().to_string(),
            column: state.column.clone(),
            roster_size: total,
        });
        self.event_bus.publish(AttendanceEvent::CountersChanged {
            present,
            absent: total.saturating_sub(present),
            total,
        });

        self.ledger = Some(state);
        self.last_summary = None;
        self.last_writer_stats = None;
        self.set_component_state("ledger", ComponentState::Running)
            .await;

        Ok(())
    }

    /// Roster status from the ledger plus the last finished session
    pub fn report(&self) -> Option<RosterReport> {
        let ledger = self.ledger.as_ref()?;
        let log = self
            .last_summary
            .as_ref()
            .map(|s| s.accepted.as_slice())
            .unwrap_or(&[]);

        Some(RosterReport::build(&ledger.roster, &ledger.marks, log))
    }
}
