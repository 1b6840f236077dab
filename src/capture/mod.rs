pub mod capture_loop;
pub mod connector;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod pattern;
pub mod source;

pub use capture_loop::{CaptureLoop, SessionSummary};
pub use connector::{CaptureError, ConnectorState, RetryPolicy, StreamConnector};
pub use frame::{FrameBuffer, FrameMetadata, PixelFormat, RawFrame};
pub use source::{ConnectError, FrameReader, ReadError, StreamSource};
