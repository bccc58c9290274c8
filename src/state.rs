use crate::config::settings::AppConfig;
use crate::infrastructure::queue::RabbitMqService;
use crate::infrastructure::storage::StorageService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub storage: Arc<StorageService>,
    pub queue: RabbitMqService,
}

impl AppState {
    pub fn new(config: AppConfig, storage: Arc<StorageService>, queue: RabbitMqService) -> Self {
        Self {
            config,
            storage,
            queue,
        }
    }
}
