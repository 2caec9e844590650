use super::orchestrator::ActiveSession;
use super::{AttendanceOrchestrator, ComponentState};
use crate::camera::FrameAcquisition;
use crate::error::{AttendanceError, Result};
use crate::events::AttendanceEvent;
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub(super) const SCANNER_STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Pending saves are allowed to finish; a save has no timeout of its own
pub(super) const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

impl AttendanceOrchestrator {
    /// Stop the running session: acquisition, then scanner, then the ledger writer.
    ///
    /// Returns a non-zero exit code if any component failed or timed out.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Cancel all background tasks
        self.cancellation_token.cancel();

        let Some(session) = self.session.take() else {
            info!("No session running");
            self.cancellation_token = CancellationToken::new();
            return Ok(0);
        };
        let ActiveSession {
            acquisition,
            mut scanner,
            writer,
            ..
        } = session;

        let mut exit_code = 0;

        if let Err(e) = self.stop_acquisition(acquisition).await {
            error!("Error stopping acquisition: {}", e);
            exit_code = 1;
        }

        // Scanner
        self.set_component_state("scanner", ComponentState::Stopping)
            .await;
        match timeout(self.scanner_stop_timeout, &mut scanner).await {
            Ok(Ok(summary)) => {
                self.set_component_state("scanner", ComponentState::Stopped)
                    .await;
                info!(
                    "Scanner stopped: {} accepted this session, present {}/{}",
                    summary.accepted.len(),
                    summary.counters.present,
                    summary.counters.total
                );
                self.last_summary = Some(summary);
            }
            Ok(Err(e)) => {
                self.set_component_state("scanner", ComponentState::Failed)
                    .await;
                error!("Scanner task failed: {}", e);
                exit_code = 1;
            }
            Err(_) => {
                // Dropping the task releases its write queue so the writer can drain
                scanner.abort();
                self.set_component_state("scanner", ComponentState::Failed)
                    .await;
                error!("scanner component stop timeout");
                exit_code = 1;
            }
        }

        // Writer drains whatever the scanner queued before it exited
        self.set_component_state("writer", ComponentState::Stopping)
            .await;
        match timeout(self.writer_drain_timeout, writer).await {
            Ok(Ok(stats)) => {
                self.set_component_state("writer", ComponentState::Stopped)
                    .await;
                if stats.failures > 0 {
                    exit_code = 1;
                }
                self.last_writer_stats = Some(stats);
            }
            Ok(Err(e)) => {
                self.set_component_state("writer", ComponentState::Failed)
                    .await;
                error!("Ledger writer task failed: {}", e);
                exit_code = 1;
            }
            Err(_) => {
                self.set_component_state("writer", ComponentState::Failed)
                    .await;
                error!("writer component stop timeout");
                exit_code = 1;
            }
        }

        self.event_bus.publish(AttendanceEvent::CameraStatusChanged {
            connected: false,
            timestamp: SystemTime::now(),
        });

        // Fresh token and shutdown channel so a reloaded ledger can run another session
        self.cancellation_token = CancellationToken::new();
        if self.shutdown_receiver.is_none() {
            let (sender, receiver) = oneshot::channel();
            self.shutdown_sender = Some(sender);
            self.shutdown_receiver = Some(receiver);
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Join the acquisition thread off the async runtime and surface any stream error
    async fn stop_acquisition(&self, mut acquisition: FrameAcquisition) -> Result<()> {
        info!("Stopping acquisition component");
        self.set_component_state("acquisition", ComponentState::Stopping)
            .await;

        let (acquisition, stopped) = tokio::task::spawn_blocking(move || {
            let stopped = acquisition.stop();
            (acquisition, stopped)
        })
        .await
        .map_err(|e| AttendanceError::system(format!("Acquisition stop task failed: {}", e)))?;

        if !stopped {
            self.set_component_state("acquisition", ComponentState::Failed)
                .await;
            return Err(AttendanceError::component(
                "acquisition",
                "thread did not stop within timeout",
            ));
        }

        if let Some(e) = acquisition.take_error() {
            warn!("Video stream ended with error: {}", e);
            self.set_component_state("acquisition", ComponentState::Failed)
                .await;
            self.event_bus.publish(AttendanceEvent::SystemError {
                component: "acquisition".to_string(),
                error: e.to_string(),
            });
            return Err(e.into());
        }

        self.set_component_state("acquisition", ComponentState::Stopped)
            .await;
        info!("acquisition component stopped");
        Ok(())
    }
}
