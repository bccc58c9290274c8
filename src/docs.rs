use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::videos::handler::upload_videos,
        crate::modules::videos::handler::get_playback_url,
        crate::modules::videos::stream_handler::stream_hls,
    ),
    components(
        schemas(
            crate::modules::videos::dto::UploadedObject,
            crate::modules::videos::dto::UploadBatchResponse,
            crate::modules::videos::dto::PlaybackResponse,
        )
    ),
    tags(
        (name = "Videos", description = "Video ingestion and playback")
    )
)]
pub struct ApiDoc;
