use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Pixel layouts a stream decoder may hand us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba32,
    Gray8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Rgba32 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Stream PTS if available
}

impl FrameMetadata {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            sequence: 0,
            width,
            height,
            format,
            device_timestamp: None,
        }
    }

    /// Tightly packed size of a frame with this shape.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Scratch frame a `FrameReader` decodes into.
///
/// Owned by the capture loop and overwritten on every read, so it is never
/// handed to readers directly.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub meta: FrameMetadata,
}

impl RawFrame {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            meta: FrameMetadata::new(0, 0, PixelFormat::Rgb24),
        }
    }

    /// Set the shape for the next decode and size `data` to match.
    pub fn prepare(&mut self, width: u32, height: u32, format: PixelFormat) {
        self.meta.width = width;
        self.meta.height = height;
        self.meta.format = format;
        self.data.resize(self.meta.byte_len(), 0);
    }

    /// True when the decoder produced nothing usable.
    pub fn is_empty(&self) -> bool {
        self.meta.is_degenerate() || self.data.len() < self.meta.byte_len()
    }
}

/// Pooled, frame-shaped storage.
///
/// Owned by exactly one of: the pool, the capture loop, the latest-frame slot
/// (behind an `Arc`) or a snapshot request holding a clone of that `Arc`.
/// Only ever mutated while uniquely owned.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    meta: FrameMetadata,
    captured_at: SystemTime,
}

impl FrameBuffer {
    /// A buffer with no backing storage; sized on first use.
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            meta: FrameMetadata::new(0, 0, PixelFormat::Rgb24),
            captured_at: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn is_degenerate(&self) -> bool {
        self.meta.is_degenerate() || self.data.len() < self.meta.byte_len()
    }

    /// True if the storage already has the shape of `meta`.
    pub fn matches_shape(&self, meta: &FrameMetadata) -> bool {
        self.meta.width == meta.width
            && self.meta.height == meta.height
            && self.meta.format == meta.format
            && self.data.len() == meta.byte_len()
    }

    /// Copy `frame` into this buffer.
    ///
    /// Storage is thrown away and allocated fresh only when the shape differs;
    /// returns `true` in that case.
    pub fn copy_from(&mut self, frame: &RawFrame) -> bool {
        let reallocated = !self.matches_shape(&frame.meta);
        if reallocated {
            self.data = vec![0; frame.meta.byte_len()];
        }

        let len = self.data.len();
        self.data.copy_from_slice(&frame.data[..len]);
        self.meta = frame.meta.clone();
        self.captured_at = SystemTime::now();
        reallocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(width: u32, height: u32, fill: u8) -> RawFrame {
        let mut frame = RawFrame::empty();
        frame.prepare(width, height, PixelFormat::Rgb24);
        frame.data.fill(fill);
        frame
    }

    #[test]
    fn empty_buffer_is_degenerate() {
        let buffer = FrameBuffer::empty();
        assert!(buffer.is_degenerate());
        assert!(buffer.data().is_empty());
    }

    #[test]
    fn same_shape_copy_reuses_storage() {
        let mut buffer = FrameBuffer::empty();
        assert!(buffer.copy_from(&raw(8, 4, 1)));
        let ptr = buffer.data().as_ptr();

        assert!(!buffer.copy_from(&raw(8, 4, 2)));
        assert_eq!(buffer.data().as_ptr(), ptr);
        assert!(buffer.data().iter().all(|&b| b == 2));
    }

    #[test]
    fn reshape_reallocates_once() {
        let mut buffer = FrameBuffer::empty();
        buffer.copy_from(&raw(8, 4, 1));

        assert!(buffer.copy_from(&raw(16, 9, 3)));
        assert_eq!((buffer.width(), buffer.height()), (16, 9));
        assert_eq!(buffer.data().len(), 16 * 9 * 3);
        assert!(buffer.data().iter().all(|&b| b == 3));

        assert!(!buffer.copy_from(&raw(16, 9, 4)));
    }

    #[test]
    fn format_change_counts_as_reshape() {
        let mut buffer = FrameBuffer::empty();
        buffer.copy_from(&raw(4, 4, 0));

        let mut gray = RawFrame::empty();
        gray.prepare(4, 4, PixelFormat::Gray8);
        assert!(buffer.copy_from(&gray));
        assert_eq!(buffer.format(), PixelFormat::Gray8);
        assert_eq!(buffer.data().len(), 16);
    }

    #[test]
    fn short_scratch_is_empty() {
        let mut frame = raw(4, 4, 0);
        frame.data.truncate(10);
        assert!(frame.is_empty());
        assert!(RawFrame::empty().is_empty());
    }
}
