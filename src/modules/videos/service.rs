use crate::infrastructure::queue::JobPublisher;
use crate::infrastructure::storage::ObjectStorage;
use crate::modules::videos::dto::UploadedObject;
use crate::modules::videos::events::ENCODE_QUEUE;
use anyhow::{Context, bail};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::io::ReaderStream;
use tracing::warn;
use uuid::Uuid;

/// One spooled upload awaiting transfer to the object store.
pub struct StagedFile {
    pub original_name: String,
    pub content_type: String,
    pub path: PathBuf,
}

pub struct IngestService;

impl IngestService {
    /// Ceiling on simultaneous in-flight storage uploads per batch.
    pub const MAX_CONCURRENT_UPLOADS: usize = 5;

    /// Fresh store key: a v4 UUID carrying only the extension of the original
    /// filename, so concurrent uploads of same-named files cannot collide.
    fn object_key(original_name: &str) -> String {
        match Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
        {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        }
    }

    /// Stores every staged file and enqueues one transcode job per stored
    /// file, at most [`Self::MAX_CONCURRENT_UPLOADS`] transfers at a time.
    /// All-or-nothing: a single failed upload or enqueue fails the batch.
    /// Every started transfer is still driven to its own completion or abort
    /// before this returns, so no multipart session is left dangling.
    pub async fn ingest_batch(
        storage: Arc<dyn ObjectStorage>,
        publisher: Arc<dyn JobPublisher>,
        files: Vec<StagedFile>,
    ) -> anyhow::Result<Vec<UploadedObject>> {
        if files.is_empty() {
            bail!("upload batch is empty");
        }

        let limiter = Arc::new(Semaphore::new(Self::MAX_CONCURRENT_UPLOADS));
        let mut tasks = JoinSet::new();

        for file in files {
            let storage = Arc::clone(&storage);
            let publisher = Arc::clone(&publisher);
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .context("upload limiter closed")?;

                let id = Self::object_key(&file.original_name);
                let reader = tokio::fs::File::open(&file.path)
                    .await
                    .with_context(|| format!("open staged file '{}'", file.original_name))?;
                let size = storage
                    .upload_object(&id, &file.content_type, ReaderStream::new(reader).boxed())
                    .await
                    .with_context(|| format!("store '{}'", file.original_name))?;

                let payload = serde_json::to_vec(&id)?;
                publisher
                    .publish(ENCODE_QUEUE, &payload)
                    .await
                    .with_context(|| format!("enqueue transcode job for {id}"))?;

                Ok::<_, anyhow::Error>(UploadedObject { id, size })
            });
        }

        let mut accepted = Vec::new();
        let mut failure: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(anyhow::anyhow!("upload task failed: {e}")));
            match result {
                Ok(object) => accepted.push(object),
                Err(e) => {
                    if failure.is_some() {
                        warn!("additional upload failure in batch: {e:#}");
                    } else {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(accepted),
        }
    }
}
