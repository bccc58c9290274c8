//! In-memory stand-ins for the storage, broker and encoder seams.

use crate::common::error::{JobError, StorageError};
use crate::infrastructure::encoder::Encoder;
use crate::infrastructure::queue::JobPublisher;
use crate::infrastructure::storage::{ByteSource, ChunkStream, ObjectStorage};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MockStorage {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub deleted: Mutex<Vec<String>>,
    /// Fail every upload after consuming the source.
    pub fail_uploads: bool,
    /// Cut download streams in half and end them with a transfer error.
    pub fail_download_mid_stream: bool,
    /// Held while an upload is in flight, to observe the concurrency ceiling.
    pub upload_delay: Option<Duration>,
    pub uploads_in_flight: AtomicUsize,
    pub max_uploads_in_flight: AtomicUsize,
}

impl MockStorage {
    pub fn with_object(key: &str, data: &[u8]) -> Self {
        let storage = Self::default();
        storage
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        storage
    }
}

#[async_trait]
impl ObjectStorage for MockStorage {
    async fn upload_object(
        &self,
        key: &str,
        _content_type: &str,
        mut body: ByteSource,
    ) -> Result<u64, StorageError> {
        let now = self.uploads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_uploads_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }

        let result = async {
            let mut data = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| StorageError::Transfer(e.to_string()))?;
                data.extend_from_slice(&chunk);
            }
            if self.fail_uploads {
                return Err(StorageError::Transfer("simulated upload failure".into()));
            }
            let size = data.len() as u64;
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(size)
        }
        .await;

        self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn download_object(
        &self,
        key: &str,
        chunk_size: u64,
    ) -> Result<ChunkStream, StorageError> {
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let mut chunks: Vec<Result<Bytes, StorageError>> = data
            .chunks(chunk_size.max(1) as usize)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if self.fail_download_mid_stream {
            chunks.truncate(chunks.len() / 2);
            chunks.push(Err(StorageError::Transfer(
                "simulated mid-stream failure".into(),
            )));
        }
        Ok(futures_util::stream::iter(chunks).boxed())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn presigned_get_url(
        &self,
        key: &str,
        _expires_in: Duration,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains_key(key)
            .then(|| format!("https://mock-store/{key}")))
    }
}

#[derive(Default)]
pub struct MockPublisher {
    pub messages: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail: bool,
}

impl MockPublisher {
    pub fn payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl JobPublisher for MockPublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("simulated publish failure");
        }
        self.messages
            .lock()
            .unwrap()
            .push((queue.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Consumes the whole input stream, then either writes a tiny output tree
/// (exit code 0) or writes nothing.
pub struct MockEncoder {
    pub exit_code: i32,
    pub consumed: Mutex<Vec<u8>>,
    /// Simulate a wedged encoder; used to exercise stage timeouts.
    pub hang: bool,
}

impl MockEncoder {
    pub fn exiting_with(code: i32) -> Self {
        Self {
            exit_code: code,
            consumed: Mutex::new(Vec::new()),
            hang: false,
        }
    }
}

#[async_trait]
impl Encoder for MockEncoder {
    async fn run(&self, mut input: ChunkStream, output_dir: &Path) -> Result<i32, JobError> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let mut data = Vec::new();
        while let Some(chunk) = input.next().await {
            data.extend_from_slice(&chunk?);
        }
        *self.consumed.lock().unwrap() = data;

        if self.exit_code == 0 {
            let variant = output_dir.join("stream_360p");
            std::fs::create_dir_all(&variant)?;
            std::fs::write(variant.join("seg_000.ts"), b"segment")?;
            std::fs::write(output_dir.join("master.m3u8"), b"#EXTM3U")?;
        }
        Ok(self.exit_code)
    }
}
