use async_trait::async_trait;
use audiobot_domain::{
    Delivery, DeliveryStream, ExchangeDescriptor, ExchangeKind, MessageBroker, OutboundMessage,
    QueueDescriptor,
};
use audiobot_errors::{SchedulerError, SchedulerResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// 内存消息代理实现
///
/// 使用 Tokio channels 模拟direct/fanout交换机路由，适用于嵌入式部署和测试。
/// 不支持优先级，每个队列只允许一个消费者。
#[derive(Debug, Default, Clone)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueSlot>,
    /// (交换机, 绑定键, 队列)
    bindings: Vec<(String, String, String)>,
}

#[derive(Debug)]
struct QueueSlot {
    sender: mpsc::UnboundedSender<(String, Vec<u8>)>,
    receiver: Option<mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        info!("Creating in-memory message broker");
        Self::default()
    }

    /// 队列是否已声明
    pub async fn has_queue(&self, name: &str) -> bool {
        self.state.read().await.queues.contains_key(name)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare(
        &self,
        exchanges: &[ExchangeDescriptor],
        queues: &[QueueDescriptor],
    ) -> SchedulerResult<()> {
        let mut state = self.state.write().await;

        for exchange in exchanges {
            if let Some(existing) = state.exchanges.get(&exchange.name) {
                if *existing != exchange.kind {
                    return Err(SchedulerError::MessageQueue(format!(
                        "交换机 {} 已以不同类型声明",
                        exchange.name
                    )));
                }
                continue;
            }
            state.exchanges.insert(exchange.name.clone(), exchange.kind);
            debug!("Declared in-memory exchange: {}", exchange.name);
        }

        for queue in queues {
            if !state.queues.contains_key(&queue.name) {
                let (sender, receiver) = mpsc::unbounded_channel();
                state.queues.insert(
                    queue.name.clone(),
                    QueueSlot {
                        sender,
                        receiver: Some(receiver),
                    },
                );
                debug!("Declared in-memory queue: {}", queue.name);
            }

            for binding in &queue.bindings {
                if !state.exchanges.contains_key(&binding.exchange) {
                    return Err(SchedulerError::MessageQueue(format!(
                        "绑定队列 {} 失败: 交换机 {} 不存在",
                        queue.name, binding.exchange
                    )));
                }
                let entry = (
                    binding.exchange.clone(),
                    binding.routing_key.clone(),
                    queue.name.clone(),
                );
                if !state.bindings.contains(&entry) {
                    state.bindings.push(entry);
                }
            }
        }

        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> SchedulerResult<()> {
        let state = self.state.read().await;
        let kind = state.exchanges.get(&message.exchange).ok_or_else(|| {
            SchedulerError::MessageQueue(format!("交换机 {} 不存在", message.exchange))
        })?;

        let targets: Vec<&String> = state
            .bindings
            .iter()
            .filter(|(exchange, key, _)| {
                exchange == &message.exchange
                    && (*kind == ExchangeKind::Fanout || key == &message.routing_key)
            })
            .map(|(_, _, queue)| queue)
            .collect();

        if targets.is_empty() {
            debug!(
                "消息无法路由，已丢弃: exchange={}, routing_key={}",
                message.exchange, message.routing_key
            );
            return Ok(());
        }

        for queue in targets {
            if let Some(slot) = state.queues.get(queue) {
                // 消费者已退出时接收端被丢弃，消息随之丢失
                let _ = slot
                    .sender
                    .send((message.routing_key.clone(), message.payload.clone()));
            }
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueDescriptor,
        _consumer_tag: &str,
        _prefetch: u16,
    ) -> SchedulerResult<DeliveryStream> {
        let mut state = self.state.write().await;
        let slot = state
            .queues
            .get_mut(&queue.name)
            .ok_or_else(|| SchedulerError::MessageQueue(format!("队列 {} 不存在", queue.name)))?;
        let receiver = slot.receiver.take().ok_or_else(|| {
            SchedulerError::MessageQueue(format!("队列 {} 已有消费者", queue.name))
        })?;

        let queue_name = queue.name.clone();
        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let queue_name = queue_name.clone();
            async move {
                let (routing_key, body) = receiver.recv().await?;
                Some((Ok(Delivery::new(queue_name, routing_key, body)), receiver))
            }
        });
        Ok(Box::pin(stream))
    }

    /// 丢弃所有队列，结束所有消费流
    async fn close(&self) -> SchedulerResult<()> {
        let mut state = self.state.write().await;
        state.queues.clear();
        state.bindings.clear();
        info!("In-memory message broker closed");
        Ok(())
    }
}
