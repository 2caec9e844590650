use super::orchestrator::ActiveSession;
use super::{AttendanceOrchestrator, ComponentState};
use crate::camera::{FrameAcquisition, VideoSourceBuilder};
use crate::error::{AttendanceError, Result, VideoSourceError};
use crate::events::AttendanceEvent;
use crate::frame_slot;
use crate::ledger::{LedgerWriter, NoLockProbe};
use crate::session::{QrDecoder, Scanner, SessionState};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

impl AttendanceOrchestrator {
    /// Start a scanning session against the loaded ledger.
    ///
    /// Fails fast if the video source cannot be opened or produces no first frame.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting attendance session");

        if self.session.is_some() {
            return Err(VideoSourceError::AlreadyRunning.into());
        }
        let ledger = self
            .ledger
            .clone()
            .ok_or_else(|| AttendanceError::system("No ledger loaded"))?;
        if self.document.is_none() {
            return Err(AttendanceError::system(
                "Ledger was used by a previous session; reload it before scanning again",
            ));
        }

        // Frame acquisition first, so a dead camera leaves the ledger untouched
        self.set_component_state("acquisition", ComponentState::Starting)
            .await;

        let source = match self.video_source.take() {
            Some(source) => source,
            None => VideoSourceBuilder::new()
                .config(self.config.camera.clone())
                .build()?,
        };
        let (producer, consumer) = frame_slot::channel();
        let acquisition_config = self.config.acquisition.clone();

        let started = tokio::task::spawn_blocking(move || {
            FrameAcquisition::start(source, producer, &acquisition_config)
        })
        .await
        .map_err(|e| AttendanceError::system(format!("Acquisition start task failed: {}", e)))?;

        let acquisition = match started {
            Ok(acquisition) => acquisition,
            Err(e) => {
                error!("Failed to start frame acquisition: {}", e);
                self.set_component_state("acquisition", ComponentState::Failed)
                    .await;
                self.event_bus.publish(AttendanceEvent::CameraStatusChanged {
                    connected: false,
                    timestamp: SystemTime::now(),
                });
                return Err(e.into());
            }
        };

        self.set_component_state("acquisition", ComponentState::Running)
            .await;
        self.event_bus.publish(AttendanceEvent::CameraStatusChanged {
            connected: true,
            timestamp: SystemTime::now(),
        });

        // Ledger writer
        self.set_component_state("writer", ComponentState::Starting)
            .await;

        let document = self
            .document
            .take()
            .ok_or_else(|| AttendanceError::system("Ledger document missing"))?;
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let mut writer = LedgerWriter::new(
            ledger.path.clone(),
            document,
            ledger.column.clone(),
            Arc::clone(&ledger.roster),
            self.config.ledger.present_glyph.clone(),
            Arc::clone(&self.event_bus),
        );
        if ledger.read_only {
            writer = writer.with_probe(Box::new(NoLockProbe));
        }
        let writer = writer.spawn(writes_rx);

        self.set_component_state("writer", ComponentState::Running)
            .await;

        // Scanner
        self.set_component_state("scanner", ComponentState::Starting)
            .await;

        let state = SessionState::new(
            Arc::clone(&ledger.roster),
            ledger.marks.clone(),
            self.loader.validator(),
            self.config.scanner.cooldown(),
        );
        let decoder = self
            .decoder
            .take()
            .unwrap_or_else(|| Box::new(QrDecoder));
        let scanner = Scanner::new(state, decoder, Arc::clone(&self.event_bus))
            .with_overlays(self.config.scanner.publish_overlays);

        let ended = CancellationToken::new();
        let scanner_ended = ended.clone();
        let token = self.cancellation_token.child_token();
        let poll_interval = self.config.scanner.poll_interval();

        let scanner = tokio::spawn(async move {
            let summary = scanner.run(consumer, writes_tx, poll_interval, token).await;
            scanner_ended.cancel();
            summary
        });

        self.set_component_state("scanner", ComponentState::Running)
            .await;

        self.session = Some(ActiveSession {
            acquisition,
            scanner,
            writer,
            ended,
        });

        info!("Attendance session started");
        Ok(())
    }
}
