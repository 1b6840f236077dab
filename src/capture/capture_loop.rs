//! Background producer: connect, read, copy into a pooled buffer, publish

use std::convert::Infallible;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::connector::{CaptureError, ConnectorState, StreamConnector};
use super::frame::{FrameMetadata, RawFrame};
use super::source::{FrameReader, ReadError, StreamSource};
use crate::pipeline::{FramePool, LatestFrame};

/// How one connect-and-stream cycle ended
#[derive(Debug)]
pub struct SessionSummary {
    pub frames: u64,
    pub ended_by: ReadError,
}

/// Owns the connector and is the only writer of the latest-frame slot
pub struct CaptureLoop<S: StreamSource> {
    connector: StreamConnector<S>,
    pool: Arc<FramePool>,
    latest: Arc<LatestFrame>,
    scratch: RawFrame,
    sequence: u64,
    last_shape: Option<FrameMetadata>,
}

impl<S: StreamSource> CaptureLoop<S> {
    pub fn new(
        connector: StreamConnector<S>,
        pool: Arc<FramePool>,
        latest: Arc<LatestFrame>,
    ) -> Self {
        Self {
            connector,
            pool,
            latest,
            scratch: RawFrame::empty(),
            sequence: 0,
            last_shape: None,
        }
    }

    pub fn connector(&self) -> &StreamConnector<S> {
        &self.connector
    }

    /// Total frames published since construction.
    pub fn frames_published(&self) -> u64 {
        self.sequence
    }

    /// Run until the stream cannot be (re)opened. Only returns on that error.
    ///
    /// Mid-stream failures are never fatal: each one starts a new reconnect
    /// cycle with a fresh retry budget.
    pub fn run(mut self) -> Result<Infallible, CaptureError> {
        loop {
            self.run_session()?;
        }
    }

    /// One reconnect cycle: open the stream (with retry) and read until it fails.
    ///
    /// A connection that fails before its first frame is charged to the
    /// connect budget, so an upstream that accepts and then drops every
    /// connection still ends in `RetriesExhausted`.
    pub fn run_session(&mut self) -> Result<SessionSummary, CaptureError> {
        let mut connection = self.connector.connect()?;
        let summary = self.stream(&mut connection);
        drop(connection);

        metrics::counter!("rtsnap_reconnects_total").increment(1);
        if summary.frames == 0 {
            self.connector.no_frames(&summary.ended_by)?;
            return Ok(summary);
        }

        self.connector.disconnected();
        warn!(
            url = %self.connector.url(),
            frames = summary.frames,
            reason = %summary.ended_by,
            "Failed to read frame, attempting to reconnect"
        );
        Ok(summary)
    }

    fn stream(&mut self, connection: &mut S::Connection) -> SessionSummary {
        debug_assert_eq!(self.connector.state(), ConnectorState::Connected);
        let mut frames = 0;

        loop {
            if let Err(e) = connection.read_frame(&mut self.scratch) {
                return SessionSummary { frames, ended_by: e };
            }
            if self.scratch.is_empty() {
                return SessionSummary {
                    frames,
                    ended_by: ReadError::EmptyFrame,
                };
            }

            if frames == 0 {
                self.connector.streaming();
                info!(
                    width = self.scratch.meta.width,
                    height = self.scratch.meta.height,
                    "First frame received"
                );
            }
            self.publish_scratch();
            frames += 1;
        }
    }

    /// Copy the scratch frame into a pooled buffer and swap it into the slot.
    #[instrument(level = "trace", skip(self))]
    fn publish_scratch(&mut self) {
        self.sequence += 1;
        self.scratch.meta.sequence = self.sequence;

        let mut buffer = self.pool.acquire();
        if buffer.copy_from(&self.scratch) {
            self.pool.record_storage_allocation();
        }
        self.note_shape_change();

        if let Some(previous) = self.latest.publish(buffer) {
            self.pool.release(previous);
        }
        metrics::counter!("rtsnap_frames_published_total").increment(1);
    }

    fn note_shape_change(&mut self) {
        let meta = &self.scratch.meta;
        let changed = self.last_shape.as_ref().map_or(true, |last| {
            last.width != meta.width || last.height != meta.height || last.format != meta.format
        });
        if changed {
            if self.last_shape.is_some() {
                info!(
                    width = meta.width,
                    height = meta.height,
                    format = ?meta.format,
                    "Stream resolution changed"
                );
            } else {
                debug!(
                    width = meta.width,
                    height = meta.height,
                    format = ?meta.format,
                    "Stream resolution"
                );
            }
            self.last_shape = Some(meta.clone());
        }
    }
}
