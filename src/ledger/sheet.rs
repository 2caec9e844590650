use crate::error::LedgerError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Cell-level access to the ledger's active worksheet.
///
/// Rows and columns are 1-indexed, matching spreadsheet conventions.
pub trait LedgerSheet: Send {
    /// Text of a cell, or None when the cell does not exist
    fn cell_text(&self, row: u32, column: u32) -> Option<String>;

    fn set_cell_text(&mut self, row: u32, column: u32, value: &str);

    fn max_row(&self) -> u32;

    fn max_column(&self) -> u32;

    /// Serialize the whole document back to its backing store
    fn save(&mut self) -> Result<(), LedgerError>;
}

/// Workbook on disk, read and written through umya-spreadsheet
pub struct XlsxLedger {
    path: PathBuf,
    book: umya_spreadsheet::Spreadsheet,
}

impl XlsxLedger {
    /// Read a workbook without any repair attempt
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        debug!("Reading workbook {}", path.display());

        let book = umya_spreadsheet::reader::xlsx::read(path).map_err(|e| {
            LedgerError::Unreadable {
                path: path.to_path_buf(),
                details: e.to_string(),
            }
        })?;

        if book.get_sheet_count() == 0 {
            return Err(LedgerError::NoActiveSheet);
        }

        Ok(Self {
            path: path.to_path_buf(),
            book,
        })
    }

    /// Wrap an in-memory workbook that will be saved to `path`
    pub fn from_book(path: &Path, book: umya_spreadsheet::Spreadsheet) -> Self {
        Self {
            path: path.to_path_buf(),
            book,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerSheet for XlsxLedger {
    fn cell_text(&self, row: u32, column: u32) -> Option<String> {
        self.book
            .get_active_sheet()
            .get_cell((column, row))
            .map(|cell| cell.get_value().to_string())
    }

    fn set_cell_text(&mut self, row: u32, column: u32, value: &str) {
        self.book
            .get_active_sheet_mut()
            .get_cell_mut((column, row))
            .set_value(value);
    }

    fn max_row(&self) -> u32 {
        self.book.get_active_sheet().get_highest_row()
    }

    fn max_column(&self) -> u32 {
        self.book.get_active_sheet().get_highest_column()
    }

    fn save(&mut self) -> Result<(), LedgerError> {
        umya_spreadsheet::writer::xlsx::write(&self.book, &self.path).map_err(|e| {
            LedgerError::Write {
                path: self.path.clone(),
                details: e.to_string(),
            }
        })?;
        debug!("Saved workbook {}", self.path.display());
        Ok(())
    }
}

/// Sparse in-memory sheet, used for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    cells: HashMap<(u32, u32), String>,
    saves: u32,
    fail_saves: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style cell assignment
    pub fn with_cell(mut self, row: u32, column: u32, value: &str) -> Self {
        self.set_cell_text(row, column, value);
        self
    }

    /// Make every subsequent save fail
    pub fn failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    pub fn save_count(&self) -> u32 {
        self.saves
    }
}

impl LedgerSheet for MemoryLedger {
    fn cell_text(&self, row: u32, column: u32) -> Option<String> {
        self.cells.get(&(row, column)).cloned()
    }

    fn set_cell_text(&mut self, row: u32, column: u32, value: &str) {
        self.cells.insert((row, column), value.to_string());
    }

    fn max_row(&self) -> u32 {
        self.cells.keys().map(|&(row, _)| row).max().unwrap_or(0)
    }

    fn max_column(&self) -> u32 {
        self.cells.keys().map(|&(_, column)| column).max().unwrap_or(0)
    }

    fn save(&mut self) -> Result<(), LedgerError> {
        if self.fail_saves {
            return Err(LedgerError::Write {
                path: PathBuf::from("memory"),
                details: "simulated save failure".to_string(),
            });
        }
        self.saves += 1;
        Ok(())
    }
}

/// Passes reads and edits through but never saves. Used for dry runs.
pub struct ReadOnlyLedger {
    inner: Box<dyn LedgerSheet>,
}

impl ReadOnlyLedger {
    pub fn new(inner: Box<dyn LedgerSheet>) -> Self {
        Self { inner }
    }
}

impl LedgerSheet for ReadOnlyLedger {
    fn cell_text(&self, row: u32, column: u32) -> Option<String> {
        self.inner.cell_text(row, column)
    }

    fn set_cell_text(&mut self, row: u32, column: u32, value: &str) {
        self.inner.set_cell_text(row, column, value);
    }

    fn max_row(&self) -> u32 {
        self.inner.max_row()
    }

    fn max_column(&self) -> u32 {
        self.inner.max_column()
    }

    fn save(&mut self) -> Result<(), LedgerError> {
        info!("Dry run: ledger not saved");
        Ok(())
    }
}
