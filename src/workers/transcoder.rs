use crate::common::error::JobError;
use crate::infrastructure::encoder::{Encoder, FfmpegEncoder};
use crate::infrastructure::queue::JobPublisher;
use crate::infrastructure::storage::{ObjectStorage, upload_tree};
use crate::modules::videos::events::{ENCODE_QUEUE, JobStatus, STATUS_QUEUE, StatusMessage};
use crate::state::AppState;
use futures_util::StreamExt;
use lapin::options::BasicAckOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Consumes transcode jobs and processes each under a per-process
/// concurrency ceiling sized to scratch disk and encoder capacity.
pub async fn start_transcoder_worker(state: AppState) {
    info!("Starting transcoder worker...");

    let mut consumer = state
        .queue
        .consumer(ENCODE_QUEUE, "transcoder_worker")
        .await
        .expect("Failed to attach transcode consumer");

    let worker = Arc::new(TranscodeWorker::new(
        state.storage.clone() as Arc<dyn ObjectStorage>,
        Arc::new(state.queue.clone()) as Arc<dyn JobPublisher>,
        Arc::new(FfmpegEncoder::new()),
        WorkerSettings {
            scratch_dir: state.config.scratch_dir.clone(),
            download_chunk_size: state.config.download_chunk_mib * 1024 * 1024,
            stage_timeout: Duration::from_secs(state.config.stage_timeout_secs),
        },
    ));
    let limiter = Arc::new(Semaphore::new(state.config.worker_concurrency.max(1)));

    info!("Transcoder worker listening on '{ENCODE_QUEUE}'");

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("Consume error: {e}");
                continue;
            }
        };

        let permit = match limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            let _permit = permit;
            match serde_json::from_slice::<String>(&delivery.data) {
                Ok(video_id) => worker.process(&video_id).await,
                Err(e) => error!("Discarding malformed transcode job payload: {e}"),
            }
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                error!("Failed to ack transcode job: {e}");
            }
        });
    }
}

pub struct WorkerSettings {
    pub scratch_dir: PathBuf,
    pub download_chunk_size: u64,
    /// Deadline applied to each stage so a stuck transfer or encoder cannot
    /// pin a workspace forever.
    pub stage_timeout: Duration,
}

/// State machine for one job: workspace, download, encode, upload, then
/// unconditional cleanup of local and remote scratch state.
pub struct TranscodeWorker {
    storage: Arc<dyn ObjectStorage>,
    publisher: Arc<dyn JobPublisher>,
    encoder: Arc<dyn Encoder>,
    settings: WorkerSettings,
}

impl TranscodeWorker {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        publisher: Arc<dyn JobPublisher>,
        encoder: Arc<dyn Encoder>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            storage,
            publisher,
            encoder,
            settings,
        }
    }

    /// Never returns an error: every outcome is reported as a status event,
    /// and cleanup runs on every path.
    pub async fn process(&self, video_id: &str) {
        info!("Processing transcode job for {video_id}");
        self.publish_status(video_id, JobStatus::Pending).await;

        let workspace = self.settings.scratch_dir.join(video_id);
        match self.run_stages(video_id, &workspace).await {
            Ok(()) => {
                info!("Transcode done for {video_id}");
                self.publish_status(video_id, JobStatus::Done).await;
            }
            Err(e) => {
                error!("Transcode failed for {video_id}: {e}");
                self.publish_status(video_id, JobStatus::Error(e.to_string()))
                    .await;
            }
        }

        self.cleanup(video_id, &workspace).await;
    }

    async fn run_stages(&self, video_id: &str, workspace: &Path) -> Result<(), JobError> {
        let output_dir = workspace.join("output");
        tokio::fs::create_dir_all(&output_dir).await?;

        let chunks = self
            .stage(
                "download",
                self.storage
                    .download_object(video_id, self.settings.download_chunk_size),
            )
            .await?;

        let exit_code = self
            .stage("encode", self.encoder.run(chunks, &output_dir))
            .await?;
        if exit_code != 0 {
            return Err(JobError::EncodeFailure(exit_code));
        }

        self.stage(
            "upload",
            upload_tree(self.storage.as_ref(), video_id, workspace),
        )
        .await?;
        Ok(())
    }

    async fn stage<T, E>(
        &self,
        name: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, JobError>
    where
        E: Into<JobError>,
    {
        match tokio::time::timeout(self.settings.stage_timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(JobError::StageTimeout {
                stage: name,
                seconds: self.settings.stage_timeout.as_secs(),
            }),
        }
    }

    /// Best-effort: failures are logged, never escalated past the already
    /// published terminal status.
    async fn cleanup(&self, video_id: &str, workspace: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(workspace).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(
                "Failed to remove workspace {}: {e}",
                workspace.display()
            );
        }
        if let Err(e) = self.storage.delete_object(video_id).await {
            warn!("Failed to delete source object {video_id}: {e}");
        }
    }

    async fn publish_status(&self, video_id: &str, status: JobStatus) {
        if let Err(e) = self.try_publish_status(video_id, status).await {
            error!("Failed to publish status for {video_id}: {e}");
        }
    }

    async fn try_publish_status(&self, video_id: &str, status: JobStatus) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&StatusMessage::new(video_id, status))?;
        self.publisher.publish(STATUS_QUEUE, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::testing::{MockEncoder, MockPublisher, MockStorage};

    fn settings(scratch: &Path) -> WorkerSettings {
        WorkerSettings {
            scratch_dir: scratch.to_path_buf(),
            download_chunk_size: 4,
            stage_timeout: Duration::from_secs(5),
        }
    }

    fn statuses(publisher: &MockPublisher) -> Vec<StatusMessage> {
        publisher
            .payloads(STATUS_QUEUE)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn successful_job_uploads_tree_and_publishes_done() {
        let scratch = tempfile::tempdir().unwrap();
        let storage = Arc::new(MockStorage::with_object("vid.mp4", b"0123456789"));
        let publisher = Arc::new(MockPublisher::default());
        let encoder = Arc::new(MockEncoder::exiting_with(0));

        let worker = TranscodeWorker::new(
            storage.clone(),
            publisher.clone(),
            encoder.clone(),
            settings(scratch.path()),
        );
        worker.process("vid.mp4").await;

        // encoder received every source byte, in order
        assert_eq!(&*encoder.consumed.lock().unwrap(), b"0123456789");

        let events = statuses(&publisher);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, "pending");
        assert_eq!(events[1].status, "done");
        assert_eq!(events[1].video_id, "vid.mp4");

        let objects = storage.objects.lock().unwrap();
        assert!(objects.contains_key("vid.mp4/output/master.m3u8"));
        assert!(objects.contains_key("vid.mp4/output/stream_360p/seg_000.ts"));
        // source deleted, workspace removed
        assert!(!objects.contains_key("vid.mp4"));
        drop(objects);
        assert!(!scratch.path().join("vid.mp4").exists());
    }

    #[tokio::test]
    async fn download_failure_mid_transfer_publishes_one_error_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let storage = Arc::new(MockStorage {
            fail_download_mid_stream: true,
            ..MockStorage::with_object("vid.mp4", b"0123456789abcdef")
        });
        let publisher = Arc::new(MockPublisher::default());

        let worker = TranscodeWorker::new(
            storage.clone(),
            publisher.clone(),
            Arc::new(MockEncoder::exiting_with(0)),
            settings(scratch.path()),
        );
        worker.process("vid.mp4").await;

        let events = statuses(&publisher);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, "pending");
        assert!(events[1].status.starts_with("error: "));
        assert!(!events.iter().any(|e| e.status == "done"));
        assert!(!scratch.path().join("vid.mp4").exists());
        // nothing from the failed encode was uploaded
        assert!(
            !storage
                .objects
                .lock()
                .unwrap()
                .keys()
                .any(|k| k.starts_with("vid.mp4/"))
        );
    }

    #[tokio::test]
    async fn encoder_exit_code_one_publishes_error_with_cause() {
        let scratch = tempfile::tempdir().unwrap();
        let storage = Arc::new(MockStorage::with_object("vid.mp4", b"data"));
        let publisher = Arc::new(MockPublisher::default());

        let worker = TranscodeWorker::new(
            storage,
            publisher.clone(),
            Arc::new(MockEncoder::exiting_with(1)),
            settings(scratch.path()),
        );
        worker.process("vid.mp4").await;

        let events = statuses(&publisher);
        assert_eq!(events[1].status, "error: encoder exited with code 1");
        assert!(!scratch.path().join("vid.mp4").exists());
    }

    #[tokio::test]
    async fn missing_source_object_publishes_not_found_error() {
        let scratch = tempfile::tempdir().unwrap();
        let publisher = Arc::new(MockPublisher::default());

        let worker = TranscodeWorker::new(
            Arc::new(MockStorage::default()),
            publisher.clone(),
            Arc::new(MockEncoder::exiting_with(0)),
            settings(scratch.path()),
        );
        worker.process("ghost.mp4").await;

        let events = statuses(&publisher);
        assert!(events[1].status.contains("not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn wedged_encoder_hits_the_stage_deadline() {
        let scratch = tempfile::tempdir().unwrap();
        let publisher = Arc::new(MockPublisher::default());
        let encoder = Arc::new(MockEncoder {
            exit_code: 0,
            consumed: std::sync::Mutex::new(Vec::new()),
            hang: true,
        });

        let worker = TranscodeWorker::new(
            Arc::new(MockStorage::with_object("vid.mp4", b"data")),
            publisher.clone(),
            encoder,
            WorkerSettings {
                scratch_dir: scratch.path().to_path_buf(),
                download_chunk_size: 4,
                stage_timeout: Duration::from_millis(100),
            },
        );
        worker.process("vid.mp4").await;

        let events = statuses(&publisher);
        assert!(events[1].status.contains("encode stage timed out"));
    }
}
