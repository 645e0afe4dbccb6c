//! 交换机与队列拓扑
//!
//! 拓扑在进程启动时由配置构造一次，之后以引用传递给发布者和消费者。

use audiobot_config::MessageQueueConfig;
use audiobot_errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};

use crate::task::TargetWorkerType;

/// 共享工作交换机和调度器交换机使用的固定路由键
pub const ANY_CLIENT_ROUTING_KEY: &str = "any_client";
pub const SCHEDULER_ROUTING_KEY: &str = "scheduler";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Fanout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDescriptor {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBinding {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub max_priority: Option<u8>,
    pub bindings: Vec<QueueBinding>,
}

/// 一条消息的投递目的地
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone)]
pub struct Topology {
    pub client_work: ExchangeDescriptor,
    pub client_direct: ExchangeDescriptor,
    pub command: ExchangeDescriptor,
    pub scheduler: ExchangeDescriptor,
    queue_names: audiobot_config::QueueNames,
    max_priority: u8,
}

impl Topology {
    pub fn from_config(config: &MessageQueueConfig) -> Self {
        let exchange = |name: &str, kind| ExchangeDescriptor {
            name: name.to_string(),
            kind,
            durable: false,
            auto_delete: false,
        };
        Self {
            client_work: exchange(&config.exchanges.client_work, ExchangeKind::Direct),
            client_direct: exchange(&config.exchanges.client_direct, ExchangeKind::Direct),
            command: exchange(&config.exchanges.command, ExchangeKind::Fanout),
            scheduler: exchange(&config.exchanges.scheduler, ExchangeKind::Direct),
            queue_names: config.queues.clone(),
            max_priority: config.max_priority,
        }
    }

    pub fn max_priority(&self) -> u8 {
        self.max_priority
    }

    pub fn exchanges(&self) -> Vec<ExchangeDescriptor> {
        vec![
            self.client_work.clone(),
            self.client_direct.clone(),
            self.command.clone(),
            self.scheduler.clone(),
        ]
    }

    /// 根据目标类型选择交换机和路由键
    pub fn destination(
        &self,
        target: TargetWorkerType,
        routing_key_override: Option<&str>,
    ) -> SchedulerResult<Destination> {
        let destination = match target {
            TargetWorkerType::AnyTelegramClient => Destination {
                exchange: self.client_work.name.clone(),
                routing_key: fixed_routing_key(routing_key_override, ANY_CLIENT_ROUTING_KEY)?,
            },
            TargetWorkerType::OneSpecificTelegramClient => {
                let client = routing_key_override
                    .filter(|key| !key.trim().is_empty())
                    .ok_or_else(|| {
                        SchedulerError::invalid_destination("指定客户端的任务必须提供路由键")
                    })?;
                Destination {
                    exchange: self.client_direct.name.clone(),
                    routing_key: client.to_string(),
                }
            }
            // 广播交换机忽略路由键
            TargetWorkerType::RabbitmqConsumerCommand => Destination {
                exchange: self.command.name.clone(),
                routing_key: String::new(),
            },
            TargetWorkerType::SchedulerJob => Destination {
                exchange: self.scheduler.name.clone(),
                routing_key: fixed_routing_key(routing_key_override, SCHEDULER_ROUTING_KEY)?,
            },
            TargetWorkerType::Unknown => {
                return Err(SchedulerError::invalid_destination("未知的目标工作者类型"))
            }
        };
        Ok(destination)
    }

    /// 所有客户端共享的工作队列
    pub fn shared_client_queue(&self) -> QueueDescriptor {
        QueueDescriptor {
            name: self.queue_names.client_work.clone(),
            durable: false,
            auto_delete: true,
            exclusive: false,
            max_priority: Some(self.max_priority),
            bindings: vec![QueueBinding {
                exchange: self.client_work.name.clone(),
                routing_key: ANY_CLIENT_ROUTING_KEY.to_string(),
            }],
        }
    }

    /// 单个客户端专属队列，绑定键为客户端名称
    pub fn client_queue(&self, client_name: &str, worker_id: &str) -> QueueDescriptor {
        QueueDescriptor {
            name: format!(
                "{}.{}.{}",
                self.queue_names.client_direct_prefix, worker_id, client_name
            ),
            durable: false,
            auto_delete: true,
            exclusive: true,
            max_priority: Some(self.max_priority),
            bindings: vec![QueueBinding {
                exchange: self.client_direct.name.clone(),
                routing_key: client_name.to_string(),
            }],
        }
    }

    /// 每个消费者进程一个命令队列，绑定到广播交换机
    pub fn command_queue(&self, consumer_id: &str) -> QueueDescriptor {
        QueueDescriptor {
            name: format!("{}.{}", self.queue_names.command_prefix, consumer_id),
            durable: false,
            auto_delete: true,
            exclusive: true,
            max_priority: None,
            bindings: vec![QueueBinding {
                exchange: self.command.name.clone(),
                routing_key: String::new(),
            }],
        }
    }

    pub fn scheduler_queue(&self) -> QueueDescriptor {
        QueueDescriptor {
            name: self.queue_names.scheduler.clone(),
            durable: false,
            auto_delete: true,
            exclusive: false,
            max_priority: Some(self.max_priority),
            bindings: vec![QueueBinding {
                exchange: self.scheduler.name.clone(),
                routing_key: SCHEDULER_ROUTING_KEY.to_string(),
            }],
        }
    }
}

/// 只有一个绑定的交换机不能改路由键，否则消息无法路由，记录会一直停在 QUEUED
fn fixed_routing_key(routing_key_override: Option<&str>, bound: &str) -> SchedulerResult<String> {
    match routing_key_override {
        None => Ok(bound.to_string()),
        Some(key) if key == bound => Ok(bound.to_string()),
        Some(key) => Err(SchedulerError::invalid_destination(format!(
            "路由键 {key} 没有绑定的队列，只能使用 {bound}"
        ))),
    }
}
