use std::sync::Arc;
use std::time::Duration;

use audiobot_application::{ConsumerState, StatusTracker, TaskRunner};
use audiobot_domain::{
    Delivery, DeliveryStream, MessageBroker, QueueDescriptor, Task, TaskKind, TaskStatus,
    Topology, WireBody, WireMessage,
};
use audiobot_errors::{SchedulerError, SchedulerResult};
use futures::stream::{select_all, StreamExt};
use metrics::counter;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::client_pool::ClientPool;

/// 消息来自哪个队列，决定由哪个客户端执行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueSource {
    /// 客户端专属队列
    Dedicated(String),
    Shared,
    Command,
}

/// Telegram客户端工作进程的消费者
///
/// 每个客户端一个专属队列，另有一个共享队列和一个命令队列。
/// QoS prefetch 与信号量许可数都等于客户端数量。
pub struct ClientWorkerConsumer {
    worker_id: String,
    broker: Arc<dyn MessageBroker>,
    topology: Arc<Topology>,
    pool: Arc<ClientPool>,
    runner: Arc<TaskRunner>,
    status: StatusTracker,
    permits: Arc<Semaphore>,
    state: Arc<RwLock<ConsumerState>>,
    drain_timeout: Duration,
}

enum Control {
    Continue,
    Stop,
}

impl ClientWorkerConsumer {
    pub fn new(
        worker_id: impl Into<String>,
        broker: Arc<dyn MessageBroker>,
        topology: Arc<Topology>,
        pool: ClientPool,
        runner: Arc<TaskRunner>,
        drain_timeout: Duration,
    ) -> Self {
        let status = runner.context().status.clone();
        let permits = Arc::new(Semaphore::new(pool.len()));
        Self {
            worker_id: worker_id.into(),
            broker,
            topology,
            pool: Arc::new(pool),
            runner,
            status,
            permits,
            state: Arc::new(RwLock::new(ConsumerState::Stopped)),
            drain_timeout,
        }
    }

    pub async fn state(&self) -> ConsumerState {
        *self.state.read().await
    }

    fn queues(&self) -> Vec<(QueueSource, QueueDescriptor)> {
        let mut queues: Vec<(QueueSource, QueueDescriptor)> = self
            .pool
            .names()
            .map(|name| {
                (
                    QueueSource::Dedicated(name.to_string()),
                    self.topology.client_queue(name, &self.worker_id),
                )
            })
            .collect();
        queues.push((QueueSource::Shared, self.topology.shared_client_queue()));
        queues.push((
            QueueSource::Command,
            self.topology.command_queue(&self.worker_id),
        ));
        queues
    }

    /// 运行消费循环，直到收到关闭命令、外部关闭信号或消息流结束
    #[instrument(skip_all, fields(worker_id = %self.worker_id))]
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> SchedulerResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != ConsumerState::Stopped {
                return Err(SchedulerError::Internal("工作进程已在运行".to_string()));
            }
            *state = ConsumerState::Running;
        }

        let mut deliveries = match self.subscribe().await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                *self.state.write().await = ConsumerState::Stopped;
                return Err(e);
            }
        };
        info!(
            "工作进程 {} 开始消费，客户端数量: {}",
            self.worker_id,
            self.pool.len()
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("收到关闭信号，停止接收新任务");
                    break;
                }
                next = deliveries.next() => match next {
                    None => {
                        warn!("消息流已结束");
                        break;
                    }
                    Some((_, Err(e))) => {
                        error!("接收消息失败: {}", e);
                    }
                    Some((source, Ok(delivery))) => {
                        if let Control::Stop = self.handle_delivery(source, delivery).await {
                            break;
                        }
                    }
                }
            }
        }
        drop(deliveries);

        self.drain().await;
        Ok(())
    }

    async fn subscribe(
        &self,
    ) -> SchedulerResult<futures::stream::SelectAll<
        futures::stream::BoxStream<'static, (QueueSource, SchedulerResult<Delivery>)>,
    >> {
        let queues = self.queues();
        let descriptors: Vec<QueueDescriptor> = queues.iter().map(|(_, q)| q.clone()).collect();
        self.broker
            .declare(&self.topology.exchanges(), &descriptors)
            .await?;

        let prefetch = u16::try_from(self.pool.len()).unwrap_or(u16::MAX);
        let mut streams = Vec::with_capacity(queues.len());
        for (source, queue) in queues {
            let tag = format!("{}.{}", self.worker_id, queue.name);
            let stream: DeliveryStream = self.broker.consume(&queue, &tag, prefetch).await?;
            streams.push(
                stream
                    .map(move |delivery| (source.clone(), delivery))
                    .boxed(),
            );
        }
        Ok(select_all(streams))
    }

    async fn handle_delivery(&self, source: QueueSource, mut delivery: Delivery) -> Control {
        // 收到即确认：消息至多处理一次
        if let Err(e) = delivery.ack().await {
            warn!("确认消息失败: {} {}", delivery.queue, e);
        }
        counter!("audiobot_messages_consumed_total", "consumer" => "worker").increment(1);

        let task = match WireMessage::decode(&delivery.body) {
            Ok(WireMessage {
                body: WireBody::Task(task),
                ..
            }) => task,
            Ok(WireMessage {
                body: WireBody::Job(job),
                ..
            }) => {
                warn!("工作进程忽略作业注册: {}", job.job_type);
                return Control::Continue;
            }
            Err(e) => {
                warn!("丢弃无法解析的消息: queue={} {}", delivery.queue, e);
                counter!("audiobot_messages_malformed_total", "consumer" => "worker")
                    .increment(1);
                return Control::Continue;
            }
        };

        match &task.task {
            TaskKind::Shutdown => {
                info!("收到关闭命令: {:?}", task.task_key);
                self.status.update(&task, TaskStatus::InWorker).await;
                self.status.update(&task, TaskStatus::Done).await;
                Control::Stop
            }
            TaskKind::RunJob(args) => {
                // 记录留在 QUEUED 会挡住之后同类作业的发布
                warn!("工作进程不执行作业，标记失败: {}", args.job_type);
                self.status.update(&task, TaskStatus::Failed).await;
                Control::Continue
            }
            TaskKind::Unknown => {
                warn!("丢弃未知类型的任务: queue={}", delivery.queue);
                self.status.update(&task, TaskStatus::Failed).await;
                Control::Continue
            }
            _ => {
                self.dispatch(source, task).await;
                Control::Continue
            }
        }
    }

    async fn dispatch(&self, source: QueueSource, task: Task) {
        let client = match &source {
            QueueSource::Dedicated(name) => self.pool.get(name),
            QueueSource::Shared | QueueSource::Command => self.pool.random(),
        };
        let Some(client) = client else {
            error!("没有可用的客户端: {:?}", source);
            self.status.update(&task, TaskStatus::Failed).await;
            return;
        };

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("信号量已关闭，丢弃任务: {:?}", task.task_key);
                return;
            }
        };

        debug!(
            "分派任务 {} 到客户端 {}",
            task.task_type(),
            client.name()
        );
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let _permit = permit;
            runner.run(&task, client.as_ref()).await;
        });
    }

    /// 等待所有在途任务释放许可
    async fn drain(&self) {
        *self.state.write().await = ConsumerState::Draining;
        let total = u32::try_from(self.pool.len()).unwrap_or(u32::MAX);
        info!(
            "等待在途任务完成，当前占用 {} 个许可",
            self.pool.len() - self.permits.available_permits()
        );

        match tokio::time::timeout(self.drain_timeout, self.permits.acquire_many(total)).await {
            Ok(Ok(_all)) => info!("所有在途任务已完成"),
            Ok(Err(e)) => warn!("等待在途任务失败: {}", e),
            Err(_) => warn!(
                "等待在途任务超时 ({}s)，放弃剩余任务",
                self.drain_timeout.as_secs()
            ),
        }

        *self.state.write().await = ConsumerState::Stopped;
        info!("工作进程 {} 已停止", self.worker_id);
    }
}
