use crate::config::env::{self, EnvKey};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub rabbitmq_url: String,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    /// Base of the per-job scratch workspaces.
    pub scratch_dir: PathBuf,
    pub download_chunk_mib: u64,
    pub worker_concurrency: usize,
    pub stage_timeout_secs: u64,
    pub presign_expiry_secs: u64,
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            rabbitmq_url: env::get(EnvKey::RabbitMqUrl)?,
            minio_url: env::get(EnvKey::MinioUrl)?,
            minio_bucket: env::get(EnvKey::MinioBucket)?,
            minio_access_key: env::get(EnvKey::MinioAccessKey)?,
            minio_secret_key: env::get(EnvKey::MinioSecretKey)?,
            scratch_dir: env::get_or(EnvKey::ScratchDir, "/tmp/processing").into(),
            download_chunk_mib: env::get_parsed(EnvKey::DownloadChunkMib, 30),
            worker_concurrency: env::get_parsed(EnvKey::WorkerConcurrency, 2),
            stage_timeout_secs: env::get_parsed(EnvKey::StageTimeoutSecs, 900),
            presign_expiry_secs: env::get_parsed(EnvKey::PresignExpirySecs, 3600),
        })
    }
}
