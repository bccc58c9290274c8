use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::infrastructure::queue::JobPublisher;
use crate::infrastructure::storage::ObjectStorage;
use crate::modules::videos::dto::{PlaybackResponse, UploadBatchResponse};
use crate::modules::videos::service::{IngestService, StagedFile};
use crate::state::AppState;
use axum::{
    extract::{Multipart, Path, State, multipart::Field},
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::error;

#[utoipa::path(
    post,
    path = "/api/v1/videos/upload",
    responses(
        (status = 201, description = "Files accepted for transcoding", body = ApiResponse<UploadBatchResponse>),
        (status = 400, description = "Empty batch or malformed upload"),
        (status = 500, description = "Storage or broker failure")
    ),
    tag = "Videos"
)]
pub async fn upload_videos(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let staging = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            error!("Failed to create staging dir: {e}");
            return ApiError(
                StatusCode::INTERNAL_SERVER_ERROR,
                "could not stage upload".to_string(),
            )
            .into_response();
        }
    };

    let mut staged = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return ApiError(
                    StatusCode::BAD_REQUEST,
                    format!("malformed multipart request: {e}"),
                )
                .into_response();
            }
        };

        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue; // skip non-file form fields
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if !content_type.starts_with("video/") {
            return ApiError(
                StatusCode::BAD_REQUEST,
                format!("'{original_name}': only video/* uploads are accepted"),
            )
            .into_response();
        }

        let path = staging.path().join(staged.len().to_string());
        if let Err(e) = spool_field(field, &path).await {
            return ApiError(
                StatusCode::BAD_REQUEST,
                format!("failed to read '{original_name}': {e}"),
            )
            .into_response();
        }
        staged.push(StagedFile {
            original_name,
            content_type,
            path,
        });
    }

    if staged.is_empty() {
        return ApiError(StatusCode::BAD_REQUEST, "upload batch is empty".to_string())
            .into_response();
    }

    let storage = state.storage.clone() as Arc<dyn ObjectStorage>;
    let publisher = Arc::new(state.queue.clone()) as Arc<dyn JobPublisher>;
    match IngestService::ingest_batch(storage, publisher, staged).await {
        Ok(files) => ApiSuccess(
            StatusCode::CREATED,
            ApiResponse::success(
                UploadBatchResponse { files },
                "Files accepted for transcoding",
            ),
        )
        .into_response(),
        Err(e) => {
            error!("Upload batch failed: {e:#}");
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response()
        }
    }
}

async fn spool_field(mut field: Field<'_>, path: &std::path::Path) -> anyhow::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}/playback",
    params(
        ("id" = String, Path, description = "Video identifier returned at upload time")
    ),
    responses(
        (status = 200, description = "Presigned master manifest URL", body = ApiResponse<PlaybackResponse>),
        (status = 404, description = "Video not found or not yet transcoded"),
        (status = 500, description = "Storage failure")
    ),
    tag = "Videos"
)]
pub async fn get_playback_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let key = format!("{id}/output/master.m3u8");
    let expires_in_secs = state.config.presign_expiry_secs;

    match state
        .storage
        .presigned_get_url(&key, Duration::from_secs(expires_in_secs))
        .await
    {
        Ok(Some(url)) => ApiSuccess(
            StatusCode::OK,
            ApiResponse::success(
                PlaybackResponse {
                    url,
                    expires_in_secs,
                },
                "Playback URL issued",
            ),
        )
        .into_response(),
        Ok(None) => ApiError(
            StatusCode::NOT_FOUND,
            "video not found or not yet transcoded".to_string(),
        )
        .into_response(),
        Err(e) => {
            error!("Presign failed for {key}: {e}");
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
