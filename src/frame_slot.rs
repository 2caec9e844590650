use crate::frame::FrameData;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Create a depth-1 frame hand-off between the acquisition thread and the scanner.
///
/// The producer never blocks: pushing onto a full slot discards the unconsumed
/// frame and keeps the new one. The consumer takes whatever is freshest, or
/// nothing, without waiting.
pub fn channel() -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = channel::bounded(1);
    let stats = Arc::new(FrameSlotStats::new());

    let producer = FrameProducer {
        tx,
        drain: rx.clone(),
        stats: Arc::clone(&stats),
    };
    let consumer = FrameConsumer { rx, stats };

    (producer, consumer)
}

/// Statistics for slot hand-off monitoring
#[derive(Debug)]
pub struct FrameSlotStats {
    /// Frames handed to the slot
    pub frames_pushed: AtomicU64,
    /// Unconsumed frames replaced by a newer one
    pub frames_dropped: AtomicU64,
    /// Frames taken by the consumer
    pub frames_taken: AtomicU64,
}

impl FrameSlotStats {
    fn new() -> Self {
        Self {
            frames_pushed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_taken: AtomicU64::new(0),
        }
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> FrameSlotStatsSnapshot {
        FrameSlotStatsSnapshot {
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_taken: self.frames_taken.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of slot statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSlotStatsSnapshot {
    pub frames_pushed: u64,
    pub frames_dropped: u64,
    pub frames_taken: u64,
}

/// Acquisition side of the slot. Dropping it disconnects the consumer.
pub struct FrameProducer {
    tx: Sender<FrameData>,
    drain: Receiver<FrameData>,
    stats: Arc<FrameSlotStats>,
}

impl FrameProducer {
    /// Offer a frame, replacing any frame the consumer has not taken yet
    pub fn push(&self, frame: FrameData) {
        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);

        let frame = match self.tx.try_send(frame) {
            Ok(()) => return,
            Err(TrySendError::Full(frame)) => frame,
            Err(TrySendError::Disconnected(_)) => return,
        };

        if let Ok(stale) = self.drain.try_recv() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropped stale frame {} in favour of {}", stale.id, frame.id);
        }

        // Only this producer fills the slot, so after draining it has room.
        if let Err(TrySendError::Full(frame) | TrySendError::Disconnected(frame)) =
            self.tx.try_send(frame)
        {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Slot unexpectedly full, dropped frame {}", frame.id);
        }
    }

    pub fn stats(&self) -> Arc<FrameSlotStats> {
        Arc::clone(&self.stats)
    }
}

/// Outcome of a non-blocking take
#[derive(Debug)]
pub enum SlotTake {
    Frame(FrameData),
    Empty,
    /// The producer is gone and no frame remains
    Disconnected,
}

/// Scanner side of the slot
pub struct FrameConsumer {
    rx: Receiver<FrameData>,
    stats: Arc<FrameSlotStats>,
}

impl FrameConsumer {
    /// Take the freshest frame if one is waiting
    pub fn try_take(&self) -> SlotTake {
        match self.rx.try_recv() {
            Ok(frame) => {
                self.stats.frames_taken.fetch_add(1, Ordering::Relaxed);
                trace!("Took frame {} from slot", frame.id);
                SlotTake::Frame(frame)
            }
            Err(TryRecvError::Empty) => SlotTake::Empty,
            Err(TryRecvError::Disconnected) => SlotTake::Disconnected,
        }
    }

    pub fn stats(&self) -> FrameSlotStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use std::time::SystemTime;

    fn create_test_frame(id: u64) -> FrameData {
        FrameData::new(id, SystemTime::now(), vec![0u8; 4], 2, 2, FrameFormat::Gray8)
    }

    #[test]
    fn test_empty_slot() {
        let (_producer, consumer) = channel();
        assert!(matches!(consumer.try_take(), SlotTake::Empty));
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let (producer, consumer) = channel();

        for id in 1..=5 {
            producer.push(create_test_frame(id));
        }

        match consumer.try_take() {
            SlotTake::Frame(frame) => assert_eq!(frame.id, 5),
            other => panic!("Expected newest frame, got {:?}", other),
        }
        assert!(matches!(consumer.try_take(), SlotTake::Empty));

        let stats = consumer.stats();
        assert_eq!(stats.frames_pushed, 5);
        assert_eq!(stats.frames_dropped, 4);
        assert_eq!(stats.frames_taken, 1);
    }

    #[test]
    fn test_disconnect_after_producer_dropped() {
        let (producer, consumer) = channel();
        producer.push(create_test_frame(7));
        drop(producer);

        // The last frame is still delivered before the disconnect is reported
        assert!(matches!(consumer.try_take(), SlotTake::Frame(ref f) if f.id == 7));
        assert!(matches!(consumer.try_take(), SlotTake::Disconnected));
    }

    #[test]
    fn test_push_never_blocks_across_threads() {
        let (producer, consumer) = channel();

        let handle = std::thread::spawn(move || {
            for id in 0..1000 {
                producer.push(create_test_frame(id));
            }
        });
        handle.join().unwrap();

        let mut last = None;
        while let SlotTake::Frame(frame) = consumer.try_take() {
            last = Some(frame.id);
        }
        assert_eq!(last, Some(999));
    }
}
