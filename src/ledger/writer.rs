use super::repair::sibling;
use super::roster::{LedgerColumn, Roster};
use super::sheet::LedgerSheet;
use crate::error::LedgerError;
use crate::events::{AttendanceEvent, EventBus};
use crate::session::ScanEvent;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Detects that another process holds the ledger file
pub trait LockProbe: Send {
    fn is_locked(&self, path: &Path) -> bool;
}

/// Renames the file to `<path>.tmp` and back. Any OS error means "locked".
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameProbe;

impl LockProbe for RenameProbe {
    fn is_locked(&self, path: &Path) -> bool {
        let probe = sibling(path, ".tmp");

        if let Err(e) = fs::rename(path, &probe) {
            debug!("Lock probe on {} failed: {}", path.display(), e);
            return true;
        }

        if let Err(e) = fs::rename(&probe, path) {
            error!(
                "Lock probe could not restore {} (left at {}): {}",
                path.display(),
                probe.display(),
                e
            );
            return true;
        }

        false
    }
}

/// Never touches the file; used when saves are disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLockProbe;

impl LockProbe for NoLockProbe {
    fn is_locked(&self, _path: &Path) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted,
    /// No column for today; nothing to write
    Unresolved,
    /// File held elsewhere; nothing written
    Conflict,
    UnknownIdentity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub persisted: u64,
    pub unresolved: u64,
    pub conflicts: u64,
    pub failures: u64,
}

/// Writes accepted scans into today's column, one full save per scan
pub struct LedgerWriter {
    path: PathBuf,
    document: Box<dyn LedgerSheet>,
    column: Option<LedgerColumn>,
    roster: Arc<Roster>,
    glyph: String,
    probe: Box<dyn LockProbe>,
    event_bus: Arc<EventBus>,
    stats: WriterStats,
}

impl LedgerWriter {
    pub fn new(
        path: PathBuf,
        document: Box<dyn LedgerSheet>,
        column: Option<LedgerColumn>,
        roster: Arc<Roster>,
        glyph: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            path,
            document,
            column,
            roster,
            glyph: glyph.into(),
            probe: Box::new(RenameProbe),
            event_bus,
            stats: WriterStats::default(),
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn LockProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    pub fn document(&self) -> &dyn LedgerSheet {
        self.document.as_ref()
    }

    /// Persist one accepted scan
    pub fn persist(&mut self, event: &ScanEvent) -> Result<PersistOutcome, LedgerError> {
        let Some(column) = &self.column else {
            debug!("No resolved column, '{}' kept in session only", event.identity);
            self.stats.unresolved += 1;
            return Ok(PersistOutcome::Unresolved);
        };

        let Some(entry) = self.roster.get(&event.identity) else {
            warn!("'{}' is not on the roster, nothing to write", event.identity);
            return Ok(PersistOutcome::UnknownIdentity);
        };

        if self.probe.is_locked(&self.path) {
            warn!(
                "Ledger {} is open elsewhere, '{}' not saved",
                self.path.display(),
                event.identity
            );
            self.stats.conflicts += 1;
            self.event_bus.publish(AttendanceEvent::PersistConflict {
                identity: event.identity.clone(),
            });
            return Ok(PersistOutcome::Conflict);
        }

        self.document
            .set_cell_text(entry.row_index, column.column_index, &self.glyph);

        if let Err(e) = self.document.save() {
            self.stats.failures += 1;
            return Err(e);
        }

        self.stats.persisted += 1;
        info!(
            "Marked '{}' present (row {}, column {})",
            event.identity, entry.row_index, column.column_index
        );
        self.event_bus.publish(AttendanceEvent::ScanPersisted {
            identity: event.identity.clone(),
        });

        Ok(PersistOutcome::Persisted)
    }

    /// Run the writer on the blocking pool until the sending side closes.
    ///
    /// Events are handled strictly in arrival order.
    pub fn spawn(mut self, mut events: mpsc::UnboundedReceiver<ScanEvent>) -> JoinHandle<WriterStats> {
        tokio::task::spawn_blocking(move || {
            info!("Ledger writer started for {}", self.path.display());

            while let Some(event) = events.blocking_recv() {
                if let Err(e) = self.persist(&event) {
                    error!("Failed to persist '{}': {}", event.identity, e);
                    self.event_bus.publish(AttendanceEvent::SystemError {
                        component: "ledger_writer".to_string(),
                        error: e.to_string(),
                    });
                }
            }

            info!(
                "Ledger writer stopped: {} persisted, {} conflicts, {} unresolved, {} failed",
                self.stats.persisted,
                self.stats.conflicts,
                self.stats.unresolved,
                self.stats.failures
            );
            self.stats
        })
    }
}
