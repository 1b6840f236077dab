//! Single-slot, overwrite-always handoff of the most recent frame

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::capture::FrameBuffer;

/// Holds the most recently published frame, or nothing.
///
/// One writer swaps, any number of readers peek; neither side locks. A peeked
/// `Arc` stays valid however many publishes happen after it.
#[derive(Default)]
pub struct LatestFrame {
    slot: ArcSwapOption<FrameBuffer>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
        }
    }

    /// Make `buffer` the latest frame and hand back the previous one.
    pub fn publish(&self, buffer: FrameBuffer) -> Option<Arc<FrameBuffer>> {
        self.slot.swap(Some(Arc::new(buffer)))
    }

    pub fn peek(&self) -> Option<Arc<FrameBuffer>> {
        self.slot.load_full()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.load().is_none()
    }
}
