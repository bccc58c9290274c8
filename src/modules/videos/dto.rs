use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadedObject {
    /// Store key and job correlation id, generated at ingestion time.
    pub id: String,
    pub size: u64,
}

#[derive(Serialize, ToSchema)]
pub struct UploadBatchResponse {
    pub files: Vec<UploadedObject>,
}

#[derive(Serialize, ToSchema)]
pub struct PlaybackResponse {
    pub url: String,
    pub expires_in_secs: u64,
}
