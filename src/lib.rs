pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod frame_slot;
pub mod ledger;
pub mod report;
pub mod session;

pub use app::{AttendanceOrchestrator, ComponentState, LedgerState, ShutdownReason};
pub use camera::{FrameAcquisition, MockVideoSource, VideoSource, VideoSourceBuilder};
pub use config::AttendanceConfig;
pub use error::{AttendanceError, LedgerError, Result, VideoSourceError};
pub use events::{AttendanceEvent, EventBus, EventFilter, EventReceiver};
pub use frame::{FrameData, FrameFormat};
pub use frame_slot::{FrameConsumer, FrameProducer, SlotTake};
pub use ledger::{
    find_ledgers, HistoricalMarks, LedgerColumn, LedgerLoader, LedgerSheet, LedgerWriter,
    PersistOutcome, Roster, XlsxLedger,
};
pub use report::RosterReport;
pub use session::{QrDecoder, ScanEvent, ScanOutcome, Scanner, SessionState, SessionSummary};
