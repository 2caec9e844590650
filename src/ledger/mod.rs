//! The attendance ledger: a workbook holding the roster and one column per day.
//!
//! Loading resolves today's column and snapshots the roster and existing marks.
//! Writing goes through a single [`LedgerWriter`] that probes for external
//! locks before every save.

pub mod discovery;
pub mod loader;
pub mod repair;
pub mod roster;
pub mod sheet;
pub mod validator;
pub mod writer;

pub use discovery::{find_ledgers, LedgerFileInfo};
pub use loader::{day_of_month, LedgerLayout, LedgerLoader, LoadedLedger};
pub use repair::{repair_container, RepairReport};
pub use roster::{HistoricalMarks, LedgerColumn, LedgerSnapshot, Roster, RosterEntry};
pub use sheet::{LedgerSheet, MemoryLedger, ReadOnlyLedger, XlsxLedger};
pub use validator::{IdentityValidator, StandardIdentityValidator};
pub use writer::{
    LedgerWriter, LockProbe, NoLockProbe, PersistOutcome, RenameProbe, WriterStats,
};

#[cfg(test)]
mod tests;
