pub mod s3;

pub use s3::StorageService;

use crate::common::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// Bytes flowing into the store. Errors are read failures on the caller's source.
pub type ByteSource = BoxStream<'static, std::io::Result<Bytes>>;

/// Bytes flowing out of the store in ranged chunks. An error ends the stream.
pub type ChunkStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Seam between the pipeline and the S3-compatible store. The gateway and the
/// transcode worker depend on this trait so tests can substitute an in-memory
/// implementation.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Streams `body` into the store under `key` via a multipart session and
    /// returns the number of bytes stored. The session is completed or
    /// aborted before this returns, on every path.
    async fn upload_object(
        &self,
        key: &str,
        content_type: &str,
        body: ByteSource,
    ) -> Result<u64, StorageError>;

    /// Sizes the object first so a missing key fails with `NotFound` before
    /// any range read. The stream yields exactly `ceil(size / chunk_size)`
    /// chunks; a zero-byte object yields none.
    async fn download_object(&self, key: &str, chunk_size: u64)
    -> Result<ChunkStream, StorageError>;

    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// `None` when the key does not exist, rather than an error.
    async fn presigned_get_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<Option<String>, StorageError>;
}

/// Uploads every regular file under `dir`, preserving relative paths under
/// `prefix`. Aborts the whole transfer on the first per-file failure; the
/// error names the file that failed.
pub async fn upload_tree(
    storage: &dyn ObjectStorage,
    prefix: &str,
    dir: &Path,
) -> Result<(), StorageError> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| StorageError::Transfer(format!("read dir {}: {e}", current.display())))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Transfer(format!("read dir {}: {e}", current.display())))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::Transfer(format!("stat {}: {e}", path.display())))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                upload_tree_file(storage, prefix, dir, &path).await?;
            }
        }
    }
    Ok(())
}

async fn upload_tree_file(
    storage: &dyn ObjectStorage,
    prefix: &str,
    root: &Path,
    path: &Path,
) -> Result<(), StorageError> {
    // root is always an ancestor of path here
    let relative = path.strip_prefix(root).unwrap_or(path);
    let key = format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        relative.to_string_lossy()
    );
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| StorageError::Transfer(format!("open {}: {e}", relative.display())))?;
    storage
        .upload_object(&key, &content_type, ReaderStream::new(file).boxed())
        .await
        .map_err(|e| StorageError::Transfer(format!("upload {}: {e}", relative.display())))?;
    Ok(())
}
