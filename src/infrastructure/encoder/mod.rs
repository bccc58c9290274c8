pub mod ffmpeg;

pub use ffmpeg::FfmpegEncoder;

use crate::common::error::JobError;
use crate::infrastructure::storage::ChunkStream;
use async_trait::async_trait;
use std::path::Path;

/// Drives an external encoder over a byte stream. Implementations stream
/// `input` into the encoder without buffering the whole object in memory and
/// write the segmented output tree into `output_dir`.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Returns the encoder's exit code. A non-zero code is reported, not
    /// raised; the caller decides the job outcome. `Err` is reserved for
    /// failures of the input stream or of spawning the process.
    async fn run(&self, input: ChunkStream, output_dir: &Path) -> Result<i32, JobError>;
}
