//! GStreamer-backed stream source (RTSP and anything `uridecodebin` can open)

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info};

use super::frame::{PixelFormat, RawFrame};
use super::source::{ConnectError, FrameReader, ReadError, StreamSource};

/// Opens a decode pipeline per connection
pub struct GstSource {
    latency_ms: u32,
    read_timeout: Duration,
}

impl GstSource {
    pub fn new(latency_ms: u32, read_timeout: Duration) -> Result<Self, ConnectError> {
        gst::init()
            .map_err(|e| ConnectError::Pipeline(format!("Failed to initialize GStreamer: {e}")))?;
        Ok(Self {
            latency_ms,
            read_timeout,
        })
    }

    /// Decode to packed RGB and keep only the newest sample in the sink.
    fn build_pipeline_string(&self, url: &str) -> String {
        if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
            format!(
                "rtspsrc location=\"{}\" latency={} protocols=tcp ! \
                 decodebin ! \
                 videoconvert ! \
                 video/x-raw,format=RGB ! \
                 appsink name=appsink max-buffers=1 drop=true sync=false",
                quoted(url),
                self.latency_ms
            )
        } else {
            format!(
                "uridecodebin uri=\"{}\" ! \
                 videoconvert ! \
                 video/x-raw,format=RGB ! \
                 appsink name=appsink max-buffers=1 drop=true sync=false",
                quoted(url)
            )
        }
    }
}

/// Escape a value for a double-quoted `gst-launch` property.
fn quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl StreamSource for GstSource {
    type Connection = GstStream;

    fn open(&mut self, url: &str) -> Result<GstStream, ConnectError> {
        let pipeline_str = self.build_pipeline_string(url);
        debug!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| ConnectError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| ConnectError::Pipeline("Failed to create pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| ConnectError::Pipeline("Failed to find appsink element".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| ConnectError::Pipeline("Failed to cast to AppSink".into()))?;

        // From here on, dropping the stream tears the pipeline down
        let mut stream = GstStream {
            pipeline,
            appsink,
            read_timeout: self.read_timeout,
            pending: None,
        };

        stream
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| ConnectError::Unavailable(format!("Failed to start pipeline: {e:?}")))?;

        // Wait for the source to come up; live sources report NoPreroll
        let (state_change, _, _) = stream.pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        match state_change {
            Ok(gst::StateChangeSuccess::Success)
            | Ok(gst::StateChangeSuccess::NoPreroll)
            | Ok(gst::StateChangeSuccess::Async) => {}
            Err(_) => {
                let reason = stream
                    .bus_error()
                    .unwrap_or_else(|| "pipeline refused to start".to_string());
                return Err(ConnectError::Unavailable(reason));
            }
        }

        // Live sources report success before reaching the server; only a
        // decoded sample proves the stream is up
        match stream.pull_sample() {
            Ok(sample) => stream.pending = Some(sample),
            Err(ReadError::Failed(reason)) => return Err(ConnectError::Unavailable(reason)),
            Err(e) => return Err(ConnectError::Unavailable(e.to_string())),
        }

        info!("Pipeline started for {}", url);
        Ok(stream)
    }
}

/// A playing pipeline. Set to `Null` on drop.
pub struct GstStream {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    read_timeout: Duration,
    // First sample, pulled while opening
    pending: Option<gst::Sample>,
}

impl GstStream {
    /// First pending error on the pipeline bus, if any.
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let message = bus.pop_filtered(&[gst::MessageType::Error])?;
        match message.view() {
            gst::MessageView::Error(err) => Some(err.error().to_string()),
            _ => None,
        }
    }

    /// Next decoded sample, waiting at most `read_timeout`.
    fn pull_sample(&self) -> Result<gst::Sample, ReadError> {
        let timeout = gst::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);

        match self.appsink.try_pull_sample(timeout) {
            Some(sample) => Ok(sample),
            None if self.appsink.is_eos() => Err(ReadError::EndOfStream),
            None => match self.bus_error() {
                Some(reason) => Err(ReadError::Failed(reason)),
                None => Err(ReadError::Timeout(self.read_timeout)),
            },
        }
    }
}

impl FrameReader for GstStream {
    fn read_frame(&mut self, frame: &mut RawFrame) -> Result<(), ReadError> {
        let sample = match self.pending.take() {
            Some(sample) => sample,
            None => self.pull_sample()?,
        };

        let caps = sample
            .caps()
            .ok_or_else(|| ReadError::Failed("Sample has no caps".into()))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| ReadError::Failed("Failed to parse video info from caps".into()))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| ReadError::Failed("Sample contains no buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| ReadError::Failed("Failed to map buffer".into()))?;

        frame.prepare(video_info.width(), video_info.height(), PixelFormat::Rgb24);
        if frame.is_empty() {
            return Err(ReadError::EmptyFrame);
        }

        // GStreamer pads RGB rows to 4 bytes; store them packed
        let row_len = video_info.width() as usize * 3;
        let stride = video_info.stride()[0] as usize;
        let src = map.as_slice();
        for (y, dst) in frame.data.chunks_exact_mut(row_len).enumerate() {
            let start = y * stride;
            let row = src
                .get(start..start + row_len)
                .ok_or_else(|| ReadError::Failed("Buffer shorter than caps describe".into()))?;
            dst.copy_from_slice(row);
        }

        frame.meta.device_timestamp = buffer.pts().map(|pts| Duration::from_nanos(pts.nseconds()));
        Ok(())
    }
}

impl Drop for GstStream {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
