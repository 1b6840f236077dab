//! rtsnap: latest-frame snapshot server for a live video stream

use std::path::PathBuf;
use std::sync::Arc;

use argh::FromArgs;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use rtsnap::capture::pattern::{self, PatternSource};
use rtsnap::capture::{CaptureError, CaptureLoop, RetryPolicy, StreamConnector, StreamSource};
use rtsnap::server::encode::ImageEncoder;
use rtsnap::server::{self, AppState};
use rtsnap::{Config, FramePool, LatestFrame};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Serve the latest frame of a video stream as JPEG/WebP snapshots.
#[derive(FromArgs)]
struct Args {
    /// stream URL (rtsp://..., any GStreamer URI, or pattern://WxH)
    #[argh(option)]
    url: Option<String>,

    /// HTTP listen address, e.g. 0.0.0.0:8080
    #[argh(option)]
    addr: Option<String>,

    /// path to a TOML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config =
            Config::load(self.config.as_deref()).wrap_err("Failed to load configuration")?;
        if let Some(url) = self.url {
            config.capture.url = url;
        }
        if let Some(addr) = self.addr {
            config.server.addr = addr;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rtsnap=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args: Args = argh::from_env();
    let config = args.into_config()?;

    info!("rtsnap launching...");

    let pool = Arc::new(FramePool::new());
    let latest = Arc::new(LatestFrame::new());

    // Capture runs on its own thread; it only ever reports back a fatal error
    let capture_failed = spawn_capture(&config, Arc::clone(&pool), Arc::clone(&latest))?;

    let listener = TcpListener::bind(&config.server.addr)
        .await
        .wrap_err_with(|| format!("Failed to bind HTTP listener on {}", config.server.addr))?;
    info!(address = %config.server.addr, "HTTP server listening");

    let state = AppState {
        latest,
        encoder: Arc::new(ImageEncoder),
        quality: config.server.quality,
        stream_url: Arc::from(config.capture.url.as_str()),
    };

    tokio::select! {
        served = server::serve(listener, state, shutdown_signal()) => {
            served.wrap_err("HTTP server failed")?;
        }
        failure = capture_failed => {
            let err = failure.map_err(|_| eyre!("Capture thread exited unexpectedly"))?;
            error!(error = %err, "Could not initialize stream");
            return Err(err).wrap_err("Could not initialize stream");
        }
    }

    info!(pool = ?pool.stats(), "rtsnap shutting down");
    Ok(())
}

/// Pick the source from the URL scheme and start the capture thread.
fn spawn_capture(
    config: &Config,
    pool: Arc<FramePool>,
    latest: Arc<LatestFrame>,
) -> Result<oneshot::Receiver<CaptureError>> {
    let url = config.capture.url.clone();
    let policy = RetryPolicy::from(&config.capture.retry);

    if pattern::is_pattern_url(&url) {
        return start_capture_thread(PatternSource, url, policy, pool, latest);
    }

    spawn_stream_capture(config, url, policy, pool, latest)
}

#[cfg(feature = "gstreamer-pipeline")]
fn spawn_stream_capture(
    config: &Config,
    url: String,
    policy: RetryPolicy,
    pool: Arc<FramePool>,
    latest: Arc<LatestFrame>,
) -> Result<oneshot::Receiver<CaptureError>> {
    let source = rtsnap::capture::gst_capture::GstSource::new(
        config.capture.latency_ms,
        std::time::Duration::from_millis(config.capture.read_timeout_ms),
    )?;
    start_capture_thread(source, url, policy, pool, latest)
}

#[cfg(not(feature = "gstreamer-pipeline"))]
fn spawn_stream_capture(
    _config: &Config,
    url: String,
    _policy: RetryPolicy,
    _pool: Arc<FramePool>,
    _latest: Arc<LatestFrame>,
) -> Result<oneshot::Receiver<CaptureError>> {
    Err(eyre!(
        "{url} needs the gstreamer-pipeline feature; only pattern:// sources are available"
    ))
}

fn start_capture_thread<S>(
    source: S,
    url: String,
    policy: RetryPolicy,
    pool: Arc<FramePool>,
    latest: Arc<LatestFrame>,
) -> Result<oneshot::Receiver<CaptureError>>
where
    S: StreamSource + 'static,
{
    let (tx, rx) = oneshot::channel();
    let capture = CaptureLoop::new(StreamConnector::new(source, url, policy), pool, latest);

    std::thread::Builder::new()
        .name("capture".into())
        .spawn(move || {
            let err = match capture.run() {
                Err(e) => e,
                Ok(never) => match never {},
            };
            let _ = tx.send(err);
        })
        .wrap_err("Failed to spawn capture thread")?;

    Ok(rx)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
