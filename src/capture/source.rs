//! Connector seam between the capture loop and an upstream video source

use thiserror::Error;

use super::frame::RawFrame;

/// Opening the upstream stream failed
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid stream address {url}: {reason}")]
    InvalidAddress { url: String, reason: String },
    #[error("Stream unavailable: {0}")]
    Unavailable(String),
    #[error("Pipeline error: {0}")]
    Pipeline(String),
    #[error("Stream opened but delivered no frame: {0}")]
    NoFrames(String),
}

/// A connected stream stopped yielding frames
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("End of stream")]
    EndOfStream,
    #[error("No frame within {0:?}")]
    Timeout(std::time::Duration),
    #[error("Decoder returned an empty frame")]
    EmptyFrame,
    #[error("Read failed: {0}")]
    Failed(String),
}

/// Something that can open a connection to a stream address.
///
/// Calls may block; they only ever run on the capture thread.
pub trait StreamSource: Send {
    type Connection: FrameReader;

    fn open(&mut self, url: &str) -> Result<Self::Connection, ConnectError>;
}

/// An open stream. Dropping it closes the connection.
pub trait FrameReader: Send {
    /// Decode the next frame into `frame`, reusing its storage.
    fn read_frame(&mut self, frame: &mut RawFrame) -> Result<(), ReadError>;
}
