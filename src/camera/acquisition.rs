use super::source::VideoSource;
use crate::config::AcquisitionConfig;
use crate::error::VideoSourceError;
use crate::frame_slot::FrameProducer;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Reads frames on a dedicated OS thread and hands the freshest one to the slot.
///
/// The thread owns the source. It exits when stopped or after too many
/// consecutive read failures; either way it releases the source and drops
/// the producer, which the consumer sees as a disconnect.
pub struct FrameAcquisition {
    source_name: String,
    running: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
    fatal_error: Arc<Mutex<Option<VideoSourceError>>>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl FrameAcquisition {
    /// Open the source, require one frame, then start the reader thread
    pub fn start(
        mut source: Box<dyn VideoSource>,
        producer: FrameProducer,
        config: &AcquisitionConfig,
    ) -> Result<Self, VideoSourceError> {
        let source_name = source.describe();
        info!("Opening video source {}", source_name);

        source.open()?;

        let first = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                source.release();
                return Err(VideoSourceError::NoFirstFrame {
                    source_name,
                    details: e.to_string(),
                });
            }
        };
        debug!(
            "First frame {} from {} ({}x{})",
            first.id, source_name, first.width, first.height
        );
        producer.push(first);

        let running = Arc::new(AtomicBool::new(true));
        let frames_captured = Arc::new(AtomicU64::new(1));
        let fatal_error = Arc::new(Mutex::new(None));
        let (done_tx, done) = channel::bounded(1);

        let reader = ReaderLoop {
            running: Arc::clone(&running),
            frames_captured: Arc::clone(&frames_captured),
            fatal_error: Arc::clone(&fatal_error),
            yield_delay: config.yield_delay(),
            max_consecutive_failures: config.max_consecutive_failures,
        };

        let handle = thread::Builder::new()
            .name("frame-acquisition".to_string())
            .spawn(move || {
                reader.run(source, producer);
                let _ = done_tx.send(());
            })
            .map_err(|e| VideoSourceError::Open {
                source_name: source_name.clone(),
                details: format!("failed to spawn acquisition thread: {}", e),
            })?;

        info!("Frame acquisition started on {}", source_name);

        Ok(Self {
            source_name,
            running,
            frames_captured,
            fatal_error,
            done,
            handle: Some(handle),
            stop_timeout: config.stop_timeout(),
        })
    }

    /// Signal the thread and wait up to the stop timeout for it to exit.
    ///
    /// Returns false when the thread did not finish in time; it is left
    /// detached and releases the source whenever its current read returns.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        info!("Stopping frame acquisition on {}", self.source_name);
        self.running.store(false, Ordering::Release);

        match self.done.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!("Frame acquisition thread panicked");
                }
                info!(
                    "Frame acquisition stopped after {} frames",
                    self.frames_captured()
                );
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Frame acquisition did not stop within {:?}",
                    self.stop_timeout
                );
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// The error that ended the stream, if any
    pub fn take_error(&self) -> Option<VideoSourceError> {
        self.fatal_error.lock().take()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }
}

impl Drop for FrameAcquisition {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

struct ReaderLoop {
    running: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
    fatal_error: Arc<Mutex<Option<VideoSourceError>>>,
    yield_delay: Duration,
    max_consecutive_failures: u32,
}

impl ReaderLoop {
    fn run(self, mut source: Box<dyn VideoSource>, producer: FrameProducer) {
        let mut consecutive_failures = 0u32;

        while self.running.load(Ordering::Acquire) {
            match source.read_frame() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    trace!("Acquired frame {}", frame.id);
                    producer.push(frame);
                    self.frames_captured.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    debug!(
                        "Frame read failed ({}/{}): {}",
                        consecutive_failures, self.max_consecutive_failures, e
                    );

                    if consecutive_failures >= self.max_consecutive_failures {
                        error!(
                            "Video stream failed after {} consecutive read failures: {}",
                            consecutive_failures, e
                        );
                        *self.fatal_error.lock() = Some(VideoSourceError::StreamFailed {
                            consecutive_failures,
                            last_error: e.to_string(),
                        });
                        break;
                    }
                }
            }

            thread::sleep(self.yield_delay);
        }

        self.running.store(false, Ordering::Release);
        source.release();
        drop(producer);
        debug!("Acquisition thread exiting");
    }
}
