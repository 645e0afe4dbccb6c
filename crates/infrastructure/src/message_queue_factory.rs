use audiobot_config::MessageQueueConfig;
use audiobot_domain::MessageBroker;
use audiobot_errors::SchedulerResult;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{InMemoryBroker, RabbitMqBroker};

pub struct MessageBrokerFactory;

impl MessageBrokerFactory {
    /// 按URL选择实现：`memory://` 使用进程内代理，其余连接RabbitMQ
    pub async fn create(config: &MessageQueueConfig) -> SchedulerResult<Arc<dyn MessageBroker>> {
        debug!("Creating message broker for url scheme: {}", scheme(&config.url));

        if config.is_in_memory() {
            info!("Initializing in-memory message broker");
            return Ok(Arc::new(InMemoryBroker::new()));
        }

        info!("Initializing RabbitMQ message broker");
        let rabbitmq = RabbitMqBroker::connect(config).await?;
        Ok(Arc::new(rabbitmq))
    }
}

fn scheme(url: &str) -> &str {
    url.split_once("://").map(|(scheme, _)| scheme).unwrap_or(url)
}
