mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::{AttendanceOrchestrator, LedgerState};
pub use types::{ComponentState, ShutdownReason};
