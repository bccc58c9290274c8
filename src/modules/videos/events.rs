use serde::{Deserialize, Serialize};
use std::fmt;

/// Job submissions: payload is the JSON-encoded object identifier.
pub const ENCODE_QUEUE: &str = "video.encode";
/// Status events: payload is a JSON [`StatusMessage`].
pub const STATUS_QUEUE: &str = "video.encode.status";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Done,
    Error(String),
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error(cause) => write!(f, "error: {cause}"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub video_id: String,
    pub status: String,
}

impl StatusMessage {
    pub fn new(video_id: &str, status: JobStatus) -> Self {
        Self {
            video_id: video_id.to_string(),
            status: status.to_string(),
        }
    }
}
