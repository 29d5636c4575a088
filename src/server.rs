//! HTTP surface: snapshot and live-stream endpoints

use std::io::Cursor;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::{BufMut, Bytes, BytesMut};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::parse_size;
use crate::distributor::Distributor;

/// Fixed multipart boundary token for the live stream
pub const STREAM_BOUNDARY: &str = "frame";

/// JPEG quality for re-encoded, resized snapshots
const SNAPSHOT_QUALITY: u8 = 90;

#[derive(Clone)]
struct AppState {
    distributor: Distributor,
}

/// Builds the service router
pub fn router(distributor: Distributor) -> Router {
    Router::new()
        .route("/image", get(image_handler))
        .route("/video", get(video_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { distributor })
}

/// Serves the router until the listener fails
pub async fn serve(listener: TcpListener, distributor: Distributor) -> std::io::Result<()> {
    axum::serve(
        listener,
        router(distributor).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

#[derive(Deserialize)]
struct ImageQuery {
    s: Option<String>,
}

/// `GET /image[?s=WxH]` — one fresh JPEG snapshot
async fn image_handler(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<ImageQuery>,
    State(state): State<AppState>,
) -> Response {
    info!(client = %addr, "snapshot request");

    let subscription = match state.distributor.subscribe().await {
        Ok(subscription) => subscription,
        Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };
    let image = match subscription.next().await {
        Ok(image) => image,
        Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };

    let body = match query.s.as_deref().and_then(parse_size) {
        Some((width, height)) => resize_snapshot(image, width, height).await,
        None => image,
    };

    ([(header::CONTENT_TYPE, "image/jpeg")], body).into_response()
}

/// `GET /video` — unbounded multipart MJPEG stream.
///
/// Ends only when the client disconnects (the body stream is dropped,
/// which deregisters the session) or the pipeline shuts down.
async fn video_handler(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    info!(client = %addr, "stream request");

    let subscription = match state.distributor.subscribe().await {
        Ok(subscription) => subscription,
        Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };

    let parts = async_stream::stream! {
        loop {
            match subscription.next().await {
                Ok(image) => yield Ok::<Bytes, std::convert::Infallible>(multipart_part(&image)),
                Err(_) => break,
            }
        }
    };

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", STREAM_BOUNDARY),
        )],
        Body::from_stream(parts),
    )
        .into_response()
}

/// Frames one image as a multipart body part
fn multipart_part(image: &Bytes) -> Bytes {
    let mut part = BytesMut::with_capacity(image.len() + 96);
    part.put_slice(
        format!(
            "--{}\r\nContent-type: image/jpeg\r\nContent-length: {}\r\n\r\n",
            STREAM_BOUNDARY,
            image.len()
        )
        .as_bytes(),
    );
    part.put_slice(image);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Resamples a snapshot to the requested dimensions on a blocking thread.
///
/// Falls back to the native image if the decode or re-encode fails; a
/// broken snapshot response helps nobody.
async fn resize_snapshot(image: Bytes, width: u32, height: u32) -> Bytes {
    let native = image.clone();

    let resized = tokio::task::spawn_blocking(move || resize_jpeg(&image, width, height)).await;

    match resized {
        Ok(Ok(resized)) => resized,
        Ok(Err(e)) => {
            warn!(error = %e, width, height, "snapshot resize failed");
            native
        }
        Err(e) => {
            warn!(error = %e, "snapshot resize task failed");
            native
        }
    }
}

/// Decodes a JPEG, scales it to exactly `width`x`height` with
/// nearest-neighbor sampling, and re-encodes it
fn resize_jpeg(data: &[u8], width: u32, height: u32) -> Result<Bytes, image::ImageError> {
    let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?;
    let resized = decoded.resize_exact(width, height, FilterType::Nearest);

    let mut out = Cursor::new(Vec::new());
    resized.write_with_encoder(JpegEncoder::new_with_quality(&mut out, SNAPSHOT_QUALITY))?;
    Ok(Bytes::from(out.into_inner()))
}
