use thiserror::Error;

/// Failures raised by the object storage client.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transfer failed: {0}")]
    Transfer(String),
}

/// Failures that terminate a transcode job. Cleanup failures are not part of
/// this taxonomy: they are logged and never override a decided outcome.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("encoder exited with code {0}")]
    EncodeFailure(i32),

    #[error("{stage} stage timed out after {seconds}s")]
    StageTimeout { stage: &'static str, seconds: u64 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
