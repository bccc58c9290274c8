use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tokio_util::io::ReaderStream;

/// Proxy an HLS artifact (master manifest, variant playlist or segment) from
/// the store to the client, passing Range requests through.
#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}/hls/{*path}",
    params(
        ("id" = String, Path, description = "Video identifier"),
        ("path" = String, Path, description = "Path inside the video's output tree")
    ),
    responses(
        (status = 200, description = "Artifact content"),
        (status = 206, description = "Partial content"),
        (status = 404, description = "Not found")
    ),
    tag = "Videos"
)]
pub async fn stream_hls(
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(key) = artifact_key(&id, &path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut req = state
        .storage
        .client
        .get_object()
        .bucket(&state.storage.bucket)
        .key(&key);

    if let Some(range) = headers.get(header::RANGE).and_then(|h| h.to_str().ok()) {
        req = req.range(range.to_string());
    }

    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                return StatusCode::NOT_FOUND.into_response();
            }
            tracing::error!("S3 error streaming {key}: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut builder = axum::response::Response::builder();

    if let Some(ct) = resp.content_type() {
        builder = builder.header(header::CONTENT_TYPE, ct);
    } else {
        builder = builder.header(header::CONTENT_TYPE, "application/octet-stream");
    }
    if let Some(cl) = resp.content_length() {
        builder = builder.header(header::CONTENT_LENGTH, cl);
    }
    if let Some(cr) = resp.content_range() {
        builder = builder
            .header(header::CONTENT_RANGE, cr)
            .status(StatusCode::PARTIAL_CONTENT);
    } else {
        builder = builder
            .header(header::ACCEPT_RANGES, "bytes")
            .status(StatusCode::OK);
    }
    if let Some(etag) = resp.e_tag() {
        builder = builder.header(header::ETAG, etag);
    }

    let stream = ReaderStream::new(resp.body.into_async_read());
    builder
        .body(Body::from_stream(stream))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Store key for an artifact request. Traversal and empty segments are
/// rejected so a crafted path cannot reach outside the video's output prefix.
fn artifact_key(id: &str, path: &str) -> Option<String> {
    let clean = |s: &str| s.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    (clean(id) && clean(path)).then(|| format!("{id}/output/{path}"))
}
