//! 消息代理与系统资源端口

use std::pin::Pin;

use async_trait::async_trait;
use audiobot_errors::SchedulerResult;
use futures::Stream;

use crate::topology::{ExchangeDescriptor, QueueDescriptor};

/// 待发布的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub priority: u8,
}

#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> SchedulerResult<()>;
}

/// 从队列收到的一条消息
pub struct Delivery {
    /// 消息到达的队列名称
    pub queue: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub acker: Option<Box<dyn DeliveryAcker>>,
}

impl Delivery {
    pub fn new(queue: impl Into<String>, routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            queue: queue.into(),
            routing_key: routing_key.into(),
            body,
            acker: None,
        }
    }

    /// 收到即确认，消息至多处理一次
    pub async fn ack(&mut self) -> SchedulerResult<()> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("routing_key", &self.routing_key)
            .field("body_len", &self.body.len())
            .finish()
    }
}

pub type DeliveryStream = Pin<Box<dyn Stream<Item = SchedulerResult<Delivery>> + Send>>;

/// 消息代理抽象
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn declare(
        &self,
        exchanges: &[ExchangeDescriptor],
        queues: &[QueueDescriptor],
    ) -> SchedulerResult<()>;

    async fn publish(&self, message: &OutboundMessage) -> SchedulerResult<()>;

    async fn consume(
        &self,
        queue: &QueueDescriptor,
        consumer_tag: &str,
        prefetch: u16,
    ) -> SchedulerResult<DeliveryStream>;

    async fn close(&self) -> SchedulerResult<()> {
        Ok(())
    }
}

/// 系统可用内存探针
pub trait MemoryProbe: Send + Sync {
    fn available_memory_mb(&self) -> Option<u64>;
}
