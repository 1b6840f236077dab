//! HTTP snapshot endpoints

pub mod encode;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

use crate::pipeline::LatestFrame;
use crate::utils;
use encode::{FrameEncoder, SnapshotFormat};

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub latest: Arc<LatestFrame>,
    pub encoder: Arc<dyn FrameEncoder>,
    pub quality: u8,
    pub stream_url: Arc<str>,
}

/// Query params for snapshot requests
#[derive(Debug, Default)]
pub struct SnapshotQuery {
    pub download: Option<String>,
}

impl SnapshotQuery {
    /// First value wins when a key repeats.
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let download = pairs
            .into_iter()
            .find_map(|(key, value)| (key == "download").then_some(value));
        Self { download }
    }

    fn wants_download(&self) -> bool {
        self.download.as_deref() == Some("1")
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/image.jpg", get(snapshot_jpeg))
        .route("/image.webp", get(snapshot_webp))
        .with_state(state)
}

/// Serve until `shutdown` resolves. Handlers see the peer address.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

// Repeated keys are accepted; the first value wins
type QueryPairs = Query<Vec<(String, String)>>;

/// GET /image.jpg
async fn snapshot_jpeg(
    State(state): State<AppState>,
    Query(pairs): QueryPairs,
    request: Request,
) -> Response {
    let query = SnapshotQuery::from_pairs(pairs);
    snapshot(state, SnapshotFormat::Jpeg, query, client_addr(&request)).await
}

/// GET /image.webp
async fn snapshot_webp(
    State(state): State<AppState>,
    Query(pairs): QueryPairs,
    request: Request,
) -> Response {
    let query = SnapshotQuery::from_pairs(pairs);
    snapshot(state, SnapshotFormat::WebP, query, client_addr(&request)).await
}

fn client_addr(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[instrument(skip(state, format, query), fields(format = format.extension()))]
async fn snapshot(
    state: AppState,
    format: SnapshotFormat,
    query: SnapshotQuery,
    client: String,
) -> Response {
    let Some(frame) = state.latest.peek() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    if frame.is_degenerate() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    // CPU-bound; keep it off the async workers
    let encoder = Arc::clone(&state.encoder);
    let quality = state.quality;
    let encoded =
        tokio::task::spawn_blocking(move || encoder.encode(&frame, format, quality)).await;

    let body = match encoded {
        Ok(Ok(body)) => Bytes::from(body),
        Ok(Err(e)) => {
            error!(error = %e, format = format.extension(), "Failed to encode frame");
            metrics::counter!("rtsnap_encode_failures_total", "format" => format.extension())
                .increment(1);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            error!(error = %e, format = format.extension(), "Encoder task failed");
            metrics::counter!("rtsnap_encode_failures_total", "format" => format.extension())
                .increment(1);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let filename = utils::snapshot_filename(format);
    info!(
        filename = %filename,
        client = %client,
        url = %state.stream_url,
        format = format.extension(),
        "Snapshot downloaded"
    );
    metrics::counter!("rtsnap_snapshots_served_total", "format" => format.extension())
        .increment(1);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                utils::content_disposition(&filename, query.wants_download()),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_download_1_forces_attachment() {
        let query = |v: Option<&str>| SnapshotQuery {
            download: v.map(str::to_string),
        };
        assert!(query(Some("1")).wants_download());
        assert!(!query(Some("0")).wants_download());
        assert!(!query(Some("true")).wants_download());
        assert!(!query(None).wants_download());
    }

    #[test]
    fn repeated_download_takes_the_first_value() {
        let pairs = |items: &[(&str, &str)]| {
            items
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        };
        let first = SnapshotQuery::from_pairs(pairs(&[("download", "1"), ("download", "0")]));
        assert!(first.wants_download());

        let first =
            SnapshotQuery::from_pairs(pairs(&[("x", "1"), ("download", "0"), ("download", "1")]));
        assert!(!first.wants_download());
        assert!(SnapshotQuery::from_pairs(Vec::new()).download.is_none());
    }
}
