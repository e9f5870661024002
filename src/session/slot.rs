use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::encoding::EncodedFrame;

/// Latest-frame slot shared by the processing loop and its readers.
///
/// Holds at most one frame; each publish replaces the previous one. The
/// lock only covers an `Arc` swap or clone. Every change bumps a version on
/// a watch channel so readers can wait instead of polling.
pub struct FrameSlot {
    latest: Mutex<Option<Arc<EncodedFrame>>>,
    version: watch::Sender<u64>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            latest: Mutex::new(None),
            version,
        }
    }

    pub fn publish(&self, frame: EncodedFrame) {
        *self.latest.lock() = Some(Arc::new(frame));
        self.bump();
    }

    pub fn load(&self) -> Option<Arc<EncodedFrame>> {
        self.latest.lock().clone()
    }

    pub fn clear(&self) {
        self.latest.lock().take();
        self.bump();
    }

    /// Wake waiting readers without changing the frame.
    pub fn notify(&self) {
        self.bump();
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}
