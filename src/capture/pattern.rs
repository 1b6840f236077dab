//! Synthetic test-pattern source for running without a camera
//!
//! Address format: `pattern://<width>x<height>[?fps=<n>]`, e.g.
//! `pattern://640x480?fps=15`. Frames are a moving RGB gradient.

use std::time::{Duration, Instant};

use super::frame::{PixelFormat, RawFrame};
use super::source::{ConnectError, FrameReader, ReadError, StreamSource};

pub const SCHEME: &str = "pattern://";

const DEFAULT_FPS: u32 = 30;

/// Parsed `pattern://` address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl PatternSpec {
    pub fn parse(url: &str) -> Result<Self, ConnectError> {
        let invalid = |reason: &str| ConnectError::InvalidAddress {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid("expected pattern:// scheme"))?;
        let (size, query) = match rest.split_once('?') {
            Some((size, query)) => (size, Some(query)),
            None => (rest, None),
        };

        let (width, height) = size
            .split_once('x')
            .ok_or_else(|| invalid("expected <width>x<height>"))?;
        let width: u32 = width.parse().map_err(|_| invalid("bad width"))?;
        let height: u32 = height.parse().map_err(|_| invalid("bad height"))?;
        if width == 0 || height == 0 {
            return Err(invalid("dimensions must be non-zero"));
        }

        let mut fps = DEFAULT_FPS;
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if let Some(value) = pair.strip_prefix("fps=") {
                fps = value.parse().map_err(|_| invalid("bad fps"))?;
            }
        }

        Ok(Self { width, height, fps })
    }

    fn frame_interval(&self) -> Duration {
        if self.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / self.fps
        }
    }
}

pub fn is_pattern_url(url: &str) -> bool {
    url.starts_with(SCHEME)
}

/// `StreamSource` producing test patterns
#[derive(Debug, Default)]
pub struct PatternSource;

impl StreamSource for PatternSource {
    type Connection = PatternStream;

    fn open(&mut self, url: &str) -> Result<PatternStream, ConnectError> {
        let spec = PatternSpec::parse(url)?;
        Ok(PatternStream {
            spec,
            sequence: 0,
            next_due: Instant::now(),
        })
    }
}

pub struct PatternStream {
    spec: PatternSpec,
    sequence: u64,
    next_due: Instant,
}

impl FrameReader for PatternStream {
    fn read_frame(&mut self, frame: &mut RawFrame) -> Result<(), ReadError> {
        // Pace like a live stream
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now() + self.spec.frame_interval();

        self.sequence += 1;
        frame.prepare(self.spec.width, self.spec.height, PixelFormat::Rgb24);
        frame.meta.device_timestamp = Some(self.spec.frame_interval() * self.sequence as u32);
        fill_gradient(frame, self.sequence);
        Ok(())
    }
}

fn fill_gradient(frame: &mut RawFrame, phase: u64) {
    let width = frame.meta.width as usize;
    let height = frame.meta.height.max(1) as usize;
    let shift = (phase % 256) as usize;

    for (i, pixel) in frame.data.chunks_exact_mut(3).enumerate() {
        let x = i % width;
        let y = i / width;
        pixel[0] = ((x * 255 / width.max(1) + shift) % 256) as u8;
        pixel[1] = (y * 255 / height) as u8;
        pixel[2] = (255 - shift) as u8;
    }
}
