//! Scan session: decode frames, dedup payloads against the roster, emit accepted scans

mod decoder;
mod scanner;
mod state;
#[cfg(test)]
mod tests;

pub use decoder::{DecodedSymbol, QrDecoder, SymbolDecoder};
pub use scanner::{Scanner, SessionEnd, SessionSummary};
pub use state::{AttendanceCounters, IgnoreReason, ScanEvent, ScanOutcome, SessionState};
