pub mod rabbitmq;

pub use rabbitmq::RabbitMqService;

use async_trait::async_trait;

/// Publish seam between the pipeline and the AMQP broker, so tests can
/// capture emitted job and status messages without a broker.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: &[u8]) -> anyhow::Result<()>;
}
