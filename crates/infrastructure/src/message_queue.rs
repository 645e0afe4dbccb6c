use async_trait::async_trait;
use audiobot_config::MessageQueueConfig;
use audiobot_domain::{
    Delivery, DeliveryAcker, DeliveryStream, ExchangeDescriptor, ExchangeKind, MessageBroker,
    OutboundMessage, QueueDescriptor,
};
use audiobot_errors::{SchedulerError, SchedulerResult};
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::*,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// RabbitMQ消息代理实现
///
/// 发布使用单独的确认模式通道，每个消费者使用自己的通道以便独立设置QoS。
pub struct RabbitMqBroker {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
}

impl RabbitMqBroker {
    /// 连接RabbitMQ并开启发布确认
    pub async fn connect(config: &MessageQueueConfig) -> SchedulerResult<Self> {
        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let connection = tokio::time::timeout(
            timeout,
            Connection::connect(&config.url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| SchedulerError::MessageQueue(format!("连接RabbitMQ超时: {}s", timeout.as_secs())))?
        .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        info!("成功连接到RabbitMQ");

        Ok(Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
        })
    }

    /// 获取连接状态
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn declare_queue(&self, channel: &Channel, queue: &QueueDescriptor) -> SchedulerResult<()> {
        channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    ..Default::default()
                },
                queue_arguments(queue),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("声明队列 {} 失败: {e}", queue.name)))?;

        for binding in &queue.bindings {
            channel
                .queue_bind(
                    &queue.name,
                    &binding.exchange,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    SchedulerError::MessageQueue(format!(
                        "绑定队列 {} 到交换机 {} 失败: {e}",
                        queue.name, binding.exchange
                    ))
                })?;
        }

        debug!("队列 {} 声明成功", queue.name);
        Ok(())
    }
}

fn queue_arguments(queue: &QueueDescriptor) -> FieldTable {
    let mut arguments = FieldTable::default();
    if let Some(max_priority) = queue.max_priority {
        arguments.insert(
            ShortString::from("x-max-priority"),
            AMQPValue::ShortShortUInt(max_priority),
        );
    }
    arguments
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl DeliveryAcker for LapinAcker {
    async fn ack(&self) -> SchedulerResult<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| SchedulerError::MessageQueue(format!("确认消息失败: {e}")))
    }
}

#[async_trait]
impl MessageBroker for RabbitMqBroker {
    async fn declare(
        &self,
        exchanges: &[ExchangeDescriptor],
        queues: &[QueueDescriptor],
    ) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;

        for exchange in exchanges {
            channel
                .exchange_declare(
                    &exchange.name,
                    exchange_kind(exchange.kind),
                    ExchangeDeclareOptions {
                        durable: exchange.durable,
                        auto_delete: exchange.auto_delete,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    SchedulerError::MessageQueue(format!("声明交换机 {} 失败: {e}", exchange.name))
                })?;
            debug!("交换机 {} 声明成功", exchange.name);
        }

        for queue in queues {
            self.declare_queue(&channel, queue).await?;
        }

        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;

        let confirm = channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                BasicProperties::default()
                    .with_content_type(ShortString::from("application/json"))
                    .with_priority(message.priority),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!(
                    "发布消息到交换机 {} 失败: {e}",
                    message.exchange
                ))
            })?;

        // 等待确认
        let confirmation = confirm
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("消息发布确认失败: {e}")))?;
        if confirmation.is_nack() {
            return Err(SchedulerError::MessageQueue(format!(
                "消息被代理拒绝: exchange={}",
                message.exchange
            )));
        }

        debug!(
            "消息已发布到交换机: {} (routing_key={})",
            message.exchange, message.routing_key
        );
        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueDescriptor,
        consumer_tag: &str,
        prefetch: u16,
    ) -> SchedulerResult<DeliveryStream> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建消费通道失败: {e}")))?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("设置QoS失败: {e}")))?;

        let consumer = channel
            .basic_consume(
                &queue.name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建消费者失败: {e}")))?;

        debug!("为队列 {} 创建消费者: {}", queue.name, consumer_tag);

        let queue_name = queue.name.clone();
        let stream = consumer.map(move |result| {
            // 通道随流一起存活
            let _channel = &channel;
            match result {
                Ok(delivery) => Ok(Delivery {
                    queue: queue_name.clone(),
                    routing_key: delivery.routing_key.to_string(),
                    body: delivery.data,
                    acker: Some(Box::new(LapinAcker(delivery.acker)) as Box<dyn DeliveryAcker>),
                }),
                Err(e) => {
                    warn!("从队列 {} 接收消息失败: {}", queue_name, e);
                    Err(SchedulerError::MessageQueue(format!("接收消息失败: {e}")))
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn close(&self) -> SchedulerResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}
