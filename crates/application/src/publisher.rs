use std::sync::Arc;
use std::time::Duration;

use audiobot_config::{PublisherConfig, RetryPolicyConfig};
use audiobot_domain::{
    Job, MemoryProbe, MessageBroker, OutboundMessage, TargetWorkerType, Task, TaskStatus,
    TaskStatusRecord, TaskStatusStore, TaskType, Topology, WireMessage,
};
use audiobot_errors::{SchedulerError, SchedulerResult};
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// 发布选项
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// 覆盖默认路由键，指定客户端的任务必须提供
    pub routing_key: Option<String>,
    pub priority: Option<u8>,
    pub check_memory: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            routing_key: None,
            priority: None,
            check_memory: true,
        }
    }
}

impl PublishOptions {
    pub fn to_client(client_name: impl Into<String>) -> Self {
        Self {
            routing_key: Some(client_name.into()),
            ..Self::default()
        }
    }
}

/// 发布结果：`created` 为 false 表示已有活跃记录，本次没有发送消息
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub record: TaskStatusRecord,
    pub created: bool,
}

/// 任务发布器
///
/// 负责去重、创建状态记录、选择目标交换机、检查内存，以及带指数退避的发布。
pub struct TaskPublisher {
    broker: Arc<dyn MessageBroker>,
    status_store: Arc<dyn TaskStatusStore>,
    memory_probe: Arc<dyn MemoryProbe>,
    topology: Arc<Topology>,
    retry: RetryPolicyConfig,
    config: PublisherConfig,
    /// 同一进程内串行化 "查询活跃记录 → 创建记录"
    dedup_lock: Mutex<()>,
}

impl TaskPublisher {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        status_store: Arc<dyn TaskStatusStore>,
        memory_probe: Arc<dyn MemoryProbe>,
        topology: Arc<Topology>,
        retry: RetryPolicyConfig,
        config: PublisherConfig,
    ) -> Self {
        Self {
            broker,
            status_store,
            memory_probe,
            topology,
            retry,
            config,
            dedup_lock: Mutex::new(()),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// 发布任务。成功创建记录后 `task.task_key` 指向新记录。
    #[instrument(skip(self, task, options), fields(task_type = %task.task_type()))]
    pub async fn publish(
        &self,
        task: &mut Task,
        options: PublishOptions,
    ) -> SchedulerResult<PublishOutcome> {
        if task.task_type() == TaskType::Unknown {
            return Err(SchedulerError::invalid_destination("未知的任务类型"));
        }
        if task.target_worker_type == TargetWorkerType::Unknown {
            return Err(SchedulerError::invalid_destination("未知的目标工作者类型"));
        }
        let destination = self
            .topology
            .destination(task.target_worker_type, options.routing_key.as_deref())?;

        let task_type = task.task_type().as_str();
        let fingerprint = task.fingerprint();

        let record = {
            let _guard = self.dedup_lock.lock().await;
            if let Some(existing) = self
                .status_store
                .get_active_task_status(task_type, fingerprint.as_deref())
                .await?
            {
                debug!("任务已有活跃记录，跳过发布: {} ({})", task_type, existing.key);
                counter!("audiobot_tasks_deduplicated_total", "task_type" => task_type)
                    .increment(1);
                return Ok(PublishOutcome {
                    record: existing,
                    created: false,
                });
            }

            let record = TaskStatusRecord::queued(task_type, fingerprint);
            self.status_store.create_task_status(&record).await?;
            record
        };
        task.task_key = Some(record.key.clone());

        if let Err(e) = self.ensure_memory(options.check_memory) {
            self.fail_record(&record.key).await;
            return Err(e);
        }

        let payload = match WireMessage::task(task.clone()).encode() {
            Ok(payload) => payload,
            Err(e) => {
                self.fail_record(&record.key).await;
                return Err(e);
            }
        };

        let message = OutboundMessage {
            exchange: destination.exchange,
            routing_key: destination.routing_key,
            payload,
            priority: self.effective_priority(options.priority.unwrap_or(task.priority)),
        };

        if let Err(e) = self.publish_with_retry(&message).await {
            self.fail_record(&record.key).await;
            counter!("audiobot_publish_failures_total", "task_type" => task_type).increment(1);
            return Err(e);
        }

        counter!("audiobot_tasks_published_total", "task_type" => task_type).increment(1);
        info!(
            "任务已发布: {} key={} exchange={} routing_key={}",
            task_type, record.key, message.exchange, message.routing_key
        );

        Ok(PublishOutcome {
            record,
            created: true,
        })
    }

    /// 向调度器注册作业。作业注册不创建状态记录，按作业类型替换已有注册。
    #[instrument(skip(self, job), fields(job_type = %job.job_type))]
    pub async fn register_job(&self, job: &Job) -> SchedulerResult<()> {
        job.trigger.validate()?;
        let destination = self
            .topology
            .destination(TargetWorkerType::SchedulerJob, None)?;
        let message = OutboundMessage {
            exchange: destination.exchange,
            routing_key: destination.routing_key,
            payload: WireMessage::job(job.clone()).encode()?,
            priority: self.effective_priority(job.priority),
        };
        self.publish_with_retry(&message).await?;
        info!("作业注册已发布: {}", job.job_type);
        Ok(())
    }

    fn effective_priority(&self, requested: u8) -> u8 {
        requested.min(self.topology.max_priority())
    }

    fn ensure_memory(&self, requested: bool) -> SchedulerResult<()> {
        if !requested || !self.config.check_memory {
            return Ok(());
        }
        match self.memory_probe.available_memory_mb() {
            Some(available) if available < self.config.min_free_memory_mb => {
                warn!(
                    "可用内存不足，拒绝发布: {}MB < {}MB",
                    available, self.config.min_free_memory_mb
                );
                Err(SchedulerError::ResourceExhausted(format!(
                    "可用内存 {}MB 低于阈值 {}MB",
                    available, self.config.min_free_memory_mb
                )))
            }
            Some(_) => Ok(()),
            None => {
                warn!("无法读取系统可用内存，跳过检查");
                Ok(())
            }
        }
    }

    async fn publish_with_retry(&self, message: &OutboundMessage) -> SchedulerResult<()> {
        let mut interval = Duration::from_millis(self.retry.initial_interval_ms);
        let max_interval = Duration::from_millis(self.retry.max_interval_ms);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.broker.publish(message).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts > self.retry.max_retries => {
                    warn!("消息发布失败，已放弃: {} 次尝试, 错误: {}", attempts, e);
                    return Err(SchedulerError::TransportFailure {
                        attempts,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        "消息发布失败，{}ms 后重试 ({}/{}): {}",
                        interval.as_millis(),
                        attempts,
                        self.retry.max_retries,
                        e
                    );
                    tokio::time::sleep(interval).await;
                    interval = interval.mul_f64(self.retry.multiplier).min(max_interval);
                }
            }
        }
    }

    async fn fail_record(&self, key: &str) {
        if let Err(e) = self
            .status_store
            .update_task_status(key, TaskStatus::Failed)
            .await
        {
            warn!("无法将任务记录标记为失败: {} {}", key, e);
        }
    }
}
