use super::{ByteSource, ChunkStream, ObjectStorage};
use crate::common::error::StorageError;
use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{
    BucketVersioningStatus, CompletedMultipartUpload, CompletedPart, CorsConfiguration, CorsRule,
    VersioningConfiguration,
};
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed multipart part size. S3 rejects non-final parts under 5 MiB.
const PART_SIZE: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

impl StorageService {
    pub async fn new(endpoint: &str, bucket: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("Connected to S3 (MinIO)");

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    /// Idempotent bucket provisioning: create if absent, enable versioning
    /// and set a permissive CORS policy. Called once at startup.
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {}
            Err(e) => return Err(StorageError::Transfer(format!("head bucket: {e}"))),
        }

        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Transfer(format!("create bucket: {e}")))?;

        self.client
            .put_bucket_versioning()
            .bucket(&self.bucket)
            .versioning_configuration(
                VersioningConfiguration::builder()
                    .status(BucketVersioningStatus::Enabled)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageError::Transfer(format!("enable versioning: {e}")))?;

        let rule = CorsRule::builder()
            .allowed_methods("GET")
            .allowed_methods("PUT")
            .allowed_methods("POST")
            .allowed_methods("DELETE")
            .allowed_origins("*")
            .allowed_headers("*")
            .expose_headers("Authorization")
            .build()
            .map_err(|e| StorageError::Transfer(format!("cors rule: {e}")))?;
        let cors = CorsConfiguration::builder()
            .cors_rules(rule)
            .build()
            .map_err(|e| StorageError::Transfer(format!("cors config: {e}")))?;
        self.client
            .put_bucket_cors()
            .bucket(&self.bucket)
            .cors_configuration(cors)
            .send()
            .await
            .map_err(|e| StorageError::Transfer(format!("set cors: {e}")))?;

        info!("Created bucket '{}' with versioning and CORS", self.bucket);
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for StorageService {
    async fn upload_object(
        &self,
        key: &str,
        content_type: &str,
        body: ByteSource,
    ) -> Result<u64, StorageError> {
        run_multipart_upload(self, key, content_type, body).await
    }

    async fn download_object(
        &self,
        key: &str,
        chunk_size: u64,
    ) -> Result<ChunkStream, StorageError> {
        let head = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => head,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(StorageError::Transfer(format!("head {key}: {e}"))),
        };
        let size = head.content_length().unwrap_or(0).max(0) as u64;

        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_string();
        let ranges = chunk_ranges(size, chunk_size.max(1));

        let stream = futures_util::stream::try_unfold(ranges.into_iter(), move |mut ranges| {
            let client = client.clone();
            let bucket = bucket.clone();
            let key = key.clone();
            async move {
                let Some((start, end)) = ranges.next() else {
                    return Ok(None);
                };
                let resp = client
                    .get_object()
                    .bucket(&bucket)
                    .key(&key)
                    .range(format!("bytes={start}-{end}"))
                    .send()
                    .await
                    .map_err(|e| {
                        StorageError::Transfer(format!("range read {start}-{end} of {key}: {e}"))
                    })?;
                let data = resp
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Transfer(format!("read body of {key}: {e}")))?;
                Ok(Some((data.into_bytes(), ranges)))
            }
        })
        .boxed();

        Ok(stream)
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Transfer(format!("delete {key}: {e}")))?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StorageError::Transfer(format!("list {prefix}: {e}")))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn presigned_get_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<Option<String>, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                return Ok(None);
            }
            Err(e) => return Err(StorageError::Transfer(format!("head {key}: {e}"))),
        }

        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Transfer(format!("presign config: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| StorageError::Transfer(format!("presign {key}: {e}")))?;
        Ok(Some(request.uri().to_string()))
    }
}

/// Streams `body` through a multipart session on `transport`. The session is
/// completed or aborted before this returns, on every path.
async fn run_multipart_upload(
    transport: &dyn PartTransport,
    key: &str,
    content_type: &str,
    mut body: ByteSource,
) -> Result<u64, StorageError> {
    let mut session = MultipartSession::open(transport, key, content_type).await?;
    let mut total = 0u64;

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) => {
                total += chunk.len() as u64;
                session.write(chunk).await?;
            }
            Err(e) => {
                session.abort().await;
                return Err(StorageError::Transfer(format!("source read: {e}")));
            }
        }
    }

    session.finish().await?;
    Ok(total)
}

/// The store-side calls a multipart session makes, factored out of the session
/// so its buffering and part accounting can be exercised without a live store.
#[async_trait]
trait PartTransport: Send + Sync {
    async fn open_upload(&self, key: &str, content_type: &str) -> Result<String, StorageError>;

    /// Ships one part and returns its etag.
    async fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StorageError>;

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StorageError>;

    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl PartTransport for StorageService {
    async fn open_upload(&self, key: &str, content_type: &str) -> Result<String, StorageError> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Transfer(format!("open multipart for {key}: {e}")))?;
        result
            .upload_id
            .ok_or_else(|| StorageError::Transfer(format!("no upload id for {key}")))
    }

    async fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StorageError> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StorageError::Transfer(format!("upload part {part_number} of {key}: {e}"))
            })?;
        result.e_tag.ok_or_else(|| {
            StorageError::Transfer(format!("no etag for part {part_number} of {key}"))
        })
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StorageError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| StorageError::Transfer(format!("complete multipart for {key}: {e}")))?;
        Ok(())
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| StorageError::Transfer(format!("abort multipart for {key}: {e}")))?;
        Ok(())
    }
}

/// One multipart upload session. Every opened session is either completed or
/// aborted before control leaves this module; a partial upload is never left
/// dangling on the store.
struct MultipartSession<'a> {
    transport: &'a dyn PartTransport,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
}

impl<'a> MultipartSession<'a> {
    async fn open(
        transport: &'a dyn PartTransport,
        key: &str,
        content_type: &str,
    ) -> Result<Self, StorageError> {
        let upload_id = transport.open_upload(key, content_type).await?;
        Ok(Self {
            transport,
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: Vec::with_capacity(PART_SIZE),
        })
    }

    /// Buffers bytes and ships a part once the fixed part size is reached.
    /// Aborts the session before surfacing any part failure.
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&chunk);
        while self.buffer.len() >= PART_SIZE {
            if let Err(e) = self.flush_part().await {
                self.abort().await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn flush_part(&mut self) -> Result<(), StorageError> {
        let take = self.buffer.len().min(PART_SIZE);
        let body: Bytes = self.buffer.drain(..take).collect();

        let e_tag = self
            .transport
            .put_part(&self.key, &self.upload_id, self.part_number, body)
            .await?;
        self.parts.push(
            CompletedPart::builder()
                .e_tag(e_tag)
                .part_number(self.part_number)
                .build(),
        );
        self.part_number += 1;
        Ok(())
    }

    /// Ships the tail part and commits, referencing every part in ascending
    /// part-number order. A zero-byte source still commits one empty part so
    /// the object becomes visible.
    async fn finish(mut self) -> Result<(), StorageError> {
        if !self.buffer.is_empty() || self.parts.is_empty() {
            if let Err(e) = self.flush_part().await {
                self.abort().await;
                return Err(e);
            }
        }

        let parts = std::mem::take(&mut self.parts);
        if let Err(e) = self
            .transport
            .complete_upload(&self.key, &self.upload_id, parts)
            .await
        {
            self.abort().await;
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort abort. A failure here is logged and swallowed; the caller
    /// is already propagating the original transfer error.
    async fn abort(&self) {
        if let Err(e) = self
            .transport
            .abort_upload(&self.key, &self.upload_id)
            .await
        {
            warn!("Failed to abort multipart upload for {}: {e}", self.key);
        }
    }
}

/// Byte ranges covering `size` bytes in `chunk_size` steps. The final range
/// is clamped to `size - 1`; a zero size produces no ranges.
fn chunk_ranges(size: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    (0..size)
        .step_by(chunk_size as usize)
        .map(|start| (start, (start + chunk_size).min(size) - 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MIB: u64 = 1024 * 1024;

    /// Records every transport call so the session's part accounting and
    /// abort discipline can be asserted.
    #[derive(Default)]
    struct RecordingTransport {
        parts: Mutex<Vec<(i32, usize)>>,
        completed: Mutex<Vec<Vec<i32>>>,
        aborts: AtomicUsize,
        fail_part: Option<i32>,
    }

    #[async_trait]
    impl PartTransport for RecordingTransport {
        async fn open_upload(&self, _: &str, _: &str) -> Result<String, StorageError> {
            Ok("upload-1".to_string())
        }

        async fn put_part(
            &self,
            _: &str,
            _: &str,
            part_number: i32,
            body: Bytes,
        ) -> Result<String, StorageError> {
            if self.fail_part == Some(part_number) {
                return Err(StorageError::Transfer("simulated part failure".into()));
            }
            self.parts.lock().unwrap().push((part_number, body.len()));
            Ok(format!("etag-{part_number}"))
        }

        async fn complete_upload(
            &self,
            _: &str,
            _: &str,
            parts: Vec<CompletedPart>,
        ) -> Result<(), StorageError> {
            self.completed
                .lock()
                .unwrap()
                .push(parts.iter().map(|p| p.part_number().unwrap_or(0)).collect());
            Ok(())
        }

        async fn abort_upload(&self, _: &str, _: &str) -> Result<(), StorageError> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn source(chunks: Vec<std::io::Result<Bytes>>) -> ByteSource {
        futures_util::stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn large_source_splits_into_ascending_fixed_size_parts() {
        let transport = RecordingTransport::default();
        let body = source(vec![Ok(Bytes::from(vec![0u8; 25 * MIB as usize]))]);

        let total = run_multipart_upload(&transport, "big.mp4", "video/mp4", body)
            .await
            .unwrap();

        assert_eq!(total, 25 * MIB);
        assert_eq!(
            *transport.parts.lock().unwrap(),
            vec![
                (1, 10 * MIB as usize),
                (2, 10 * MIB as usize),
                (3, 5 * MIB as usize),
            ]
        );
        assert_eq!(*transport.completed.lock().unwrap(), vec![vec![1, 2, 3]]);
        assert_eq!(transport.aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn interrupted_source_aborts_exactly_once_without_completing() {
        let transport = RecordingTransport::default();
        let body = source(vec![
            Ok(Bytes::from(vec![0u8; 10 * MIB as usize])),
            Err(std::io::Error::other("connection reset")),
        ]);

        let err = run_multipart_upload(&transport, "cut.mp4", "video/mp4", body)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("source read"));
        assert_eq!(transport.aborts.load(Ordering::SeqCst), 1);
        assert!(transport.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn part_failure_aborts_exactly_once_without_completing() {
        let transport = RecordingTransport {
            fail_part: Some(2),
            ..RecordingTransport::default()
        };
        let body = source(vec![Ok(Bytes::from(vec![0u8; 20 * MIB as usize]))]);

        let err = run_multipart_upload(&transport, "flaky.mp4", "video/mp4", body)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("simulated part failure"));
        assert_eq!(transport.aborts.load(Ordering::SeqCst), 1);
        assert!(transport.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_byte_source_commits_one_empty_part() {
        let transport = RecordingTransport::default();

        let total = run_multipart_upload(&transport, "empty.mp4", "video/mp4", source(Vec::new()))
            .await
            .unwrap();

        assert_eq!(total, 0);
        assert_eq!(*transport.parts.lock().unwrap(), vec![(1, 0)]);
        assert_eq!(*transport.completed.lock().unwrap(), vec![vec![1]]);
        assert_eq!(transport.aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ranges_clamp_final_chunk() {
        let ranges = chunk_ranges(25 * MIB, 10 * MIB);
        assert_eq!(
            ranges,
            vec![
                (0, 10 * MIB - 1),
                (10 * MIB, 20 * MIB - 1),
                (20 * MIB, 25 * MIB - 1),
            ]
        );
    }

    #[test]
    fn ranges_cover_exact_multiple_without_empty_tail() {
        let ranges = chunk_ranges(20 * MIB, 10 * MIB);
        assert_eq!(ranges, vec![(0, 10 * MIB - 1), (10 * MIB, 20 * MIB - 1)]);
    }

    #[test]
    fn zero_byte_object_yields_no_ranges() {
        assert!(chunk_ranges(0, 10 * MIB).is_empty());
    }

    #[test]
    fn chunk_count_is_ceiling_of_size_over_chunk() {
        for (size, chunk, expected) in [(1, 10, 1), (10, 10, 1), (11, 10, 2), (99, 10, 10)] {
            assert_eq!(chunk_ranges(size, chunk).len(), expected);
        }
    }
}
