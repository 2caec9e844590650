use super::repair;
use super::roster::{HistoricalMarks, LedgerColumn, LedgerSnapshot, Roster, RosterEntry};
use super::sheet::{LedgerSheet, XlsxLedger};
use super::validator::{IdentityValidator, StandardIdentityValidator};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use chrono::{Datelike, Local, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where things live on the ledger sheet (1-indexed)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLayout {
    pub day_header_row: u32,
    pub day_label_row: u32,
    pub first_data_row: u32,
    pub external_id_column: u32,
    pub identity_column: u32,
    pub present_glyph: String,
}

impl Default for LedgerLayout {
    fn default() -> Self {
        Self {
            day_header_row: 11,
            day_label_row: 12,
            first_data_row: 13,
            external_id_column: 1,
            identity_column: 2,
            present_glyph: "✓".to_string(),
        }
    }
}

impl From<&LedgerConfig> for LedgerLayout {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            day_header_row: config.day_header_row,
            day_label_row: config.day_label_row,
            first_data_row: config.first_data_row,
            external_id_column: config.external_id_column,
            identity_column: config.identity_column,
            present_glyph: config.present_glyph.clone(),
        }
    }
}

/// An opened ledger document together with what was read from it
pub struct LoadedLedger {
    pub path: PathBuf,
    pub document: Box<dyn LedgerSheet>,
    pub snapshot: LedgerSnapshot,
}

impl fmt::Debug for LoadedLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedLedger")
            .field("path", &self.path)
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

/// Reads the roster and today's column out of a ledger sheet
#[derive(Clone)]
pub struct LedgerLoader {
    layout: LedgerLayout,
    validator: Arc<dyn IdentityValidator>,
    repair: bool,
    backup_before_repair: bool,
}

impl LedgerLoader {
    pub fn new(layout: LedgerLayout, validator: Arc<dyn IdentityValidator>) -> Self {
        Self {
            layout,
            validator,
            repair: true,
            backup_before_repair: true,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        let validator = Arc::new(StandardIdentityValidator::new(&config.excluded_keywords));
        Self::new(LedgerLayout::from(config), validator)
            .with_repair(config.repair, config.backup_before_repair)
    }

    pub fn with_repair(mut self, enabled: bool, backup: bool) -> Self {
        self.repair = enabled;
        self.backup_before_repair = backup;
        self
    }

    pub fn layout(&self) -> &LedgerLayout {
        &self.layout
    }

    pub fn validator(&self) -> Arc<dyn IdentityValidator> {
        Arc::clone(&self.validator)
    }

    /// Find the column whose day header equals `day`. First match wins.
    pub fn resolve_column(&self, sheet: &dyn LedgerSheet, day: u32) -> Option<LedgerColumn> {
        let header_row = self.layout.day_header_row;

        (1..=sheet.max_column()).find_map(|column| {
            let value = sheet.cell_text(header_row, column)?;
            if parse_day(&value)? != i64::from(day) {
                return None;
            }

            let day_code = sheet
                .cell_text(self.layout.day_label_row, column)
                .map(|s| s.trim().to_string())
                .unwrap_or_default();

            Some(LedgerColumn {
                column_index: column,
                day_code,
                day_of_month: day,
            })
        })
    }

    /// Resolve today's column, then collect roster entries and their marks.
    ///
    /// Reads only; the sheet is not modified.
    pub fn load_sheet(&self, sheet: &dyn LedgerSheet, day: u32) -> LedgerSnapshot {
        let column = self.resolve_column(sheet, day);
        match &column {
            Some(c) => info!(
                "Resolved day {} to column {} ({})",
                day, c.column_index, c.day_code
            ),
            None => warn!(
                "No column for day {} in row {}; scans will not be persisted",
                day, self.layout.day_header_row
            ),
        }

        let mut roster = Roster::new();
        let mut marks = HistoricalMarks::new();

        for row in self.layout.first_data_row..=sheet.max_row() {
            let Some(raw) = sheet.cell_text(row, self.layout.identity_column) else {
                continue;
            };
            let identity = raw.trim();
            if identity.is_empty() || !self.validator.is_valid(identity) {
                continue;
            }

            let external_id = sheet
                .cell_text(row, self.layout.external_id_column)
                .map(|s| s.trim().to_string())
                .unwrap_or_default();

            let entry = RosterEntry {
                identity: identity.to_string(),
                external_id,
                row_index: row,
            };
            if !roster.insert(entry) {
                warn!("Duplicate identity '{}' at row {} skipped", identity, row);
                continue;
            }

            if let Some(c) = &column {
                let present = sheet
                    .cell_text(row, c.column_index)
                    .is_some_and(|mark| mark.trim() == self.layout.present_glyph);
                marks.record(identity, present);
            }
        }

        debug!(
            "Loaded {} roster entries, {} already present",
            roster.len(),
            marks.present_count()
        );

        LedgerSnapshot {
            column,
            roster,
            marks,
        }
    }

    /// Open a workbook from disk, repairing the container once if it cannot be read
    pub fn open(&self, path: &Path, day: u32) -> Result<LoadedLedger, LedgerError> {
        if !path.is_file() {
            return Err(LedgerError::NotFound {
                path: path.to_path_buf(),
            });
        }

        info!("Loading ledger {}", path.display());

        let document = match XlsxLedger::open(path) {
            Ok(document) => document,
            Err(e) if self.repair && needs_repair(&e) => {
                warn!("Ledger unreadable ({}), attempting repair", e);
                repair::repair_container(path, self.backup_before_repair)?;
                XlsxLedger::open(path).map_err(|e| LedgerError::RepairFailed {
                    path: path.to_path_buf(),
                    details: e.to_string(),
                })?
            }
            Err(e) => return Err(e),
        };

        let snapshot = self.load_sheet(&document, day);

        Ok(LoadedLedger {
            path: path.to_path_buf(),
            document: Box::new(document),
            snapshot,
        })
    }
}

/// Only a container that cannot be read at all is worth re-packing
fn needs_repair(error: &LedgerError) -> bool {
    matches!(error, LedgerError::Unreadable { .. })
}

/// Integer value of a day header; integral floats ("7.0") count
fn parse_day(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(day) = text.parse::<i64>() {
        return Some(day);
    }

    let value = text.parse::<f64>().ok()?;
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}

/// Today's day of month, in `timezone` when given, otherwise local time
pub fn day_of_month(timezone: Option<chrono_tz::Tz>) -> u32 {
    match timezone {
        Some(tz) => Utc::now().with_timezone(&tz).day(),
        None => Local::now().day(),
    }
}
