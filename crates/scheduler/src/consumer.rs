use std::sync::Arc;
use std::time::Duration;

use audiobot_application::{ConsumerState, InFlight, JobRunner, StatusTracker};
use audiobot_domain::{
    Delivery, MessageBroker, Task, TaskKind, TaskStatus, Topology, WireBody, WireMessage,
};
use audiobot_errors::{SchedulerError, SchedulerResult};
use futures::stream::{select_all, StreamExt};
use metrics::counter;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::job_scheduler::JobScheduler;

enum Control {
    Continue,
    Stop,
}

/// 调度器消费者
///
/// 监听调度器队列（作业注册和直接任务）以及本进程的命令队列（关闭广播）。
/// 收到的消息一律先确认，作业或任务失败不会中断消费循环。
pub struct SchedulerConsumer {
    consumer_id: String,
    broker: Arc<dyn MessageBroker>,
    topology: Arc<Topology>,
    jobs: Arc<JobScheduler>,
    runner: Arc<JobRunner>,
    status: StatusTracker,
    state: RwLock<ConsumerState>,
    in_flight: Mutex<InFlight>,
    drain_timeout: Duration,
}

impl SchedulerConsumer {
    pub fn new(
        consumer_id: impl Into<String>,
        broker: Arc<dyn MessageBroker>,
        topology: Arc<Topology>,
        jobs: Arc<JobScheduler>,
        runner: Arc<JobRunner>,
        status: StatusTracker,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            broker,
            topology,
            jobs,
            runner,
            status,
            state: RwLock::new(ConsumerState::Stopped),
            in_flight: Mutex::new(InFlight::new()),
            drain_timeout,
        }
    }

    pub async fn state(&self) -> ConsumerState {
        *self.state.read().await
    }

    pub fn jobs(&self) -> &Arc<JobScheduler> {
        &self.jobs
    }

    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    #[instrument(skip_all, fields(consumer_id = %self.consumer_id))]
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> SchedulerResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != ConsumerState::Stopped {
                return Err(SchedulerError::Internal("调度器已在运行".to_string()));
            }
            *state = ConsumerState::Running;
        }

        let scheduler_queue = self.topology.scheduler_queue();
        let command_queue = self.topology.command_queue(&self.consumer_id);
        let subscribed = async {
            self.broker
                .declare(
                    &self.topology.exchanges(),
                    &[scheduler_queue.clone(), command_queue.clone()],
                )
                .await?;
            let prefetch = 1;
            let jobs_stream = self
                .broker
                .consume(
                    &scheduler_queue,
                    &format!("{}.scheduler", self.consumer_id),
                    prefetch,
                )
                .await?;
            let command_stream = self
                .broker
                .consume(
                    &command_queue,
                    &format!("{}.command", self.consumer_id),
                    prefetch,
                )
                .await?;
            Ok::<_, SchedulerError>(select_all(vec![jobs_stream, command_stream]))
        }
        .await;
        let mut deliveries = match subscribed {
            Ok(deliveries) => deliveries,
            Err(e) => {
                *self.state.write().await = ConsumerState::Stopped;
                return Err(e);
            }
        };
        info!("调度器 {} 开始消费", self.consumer_id);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("收到关闭信号，停止接收新消息");
                    break;
                }
                next = deliveries.next() => match next {
                    None => {
                        warn!("消息流已结束");
                        break;
                    }
                    Some(Err(e)) => error!("接收消息失败: {}", e),
                    Some(Ok(delivery)) => {
                        if let Control::Stop = self.handle_delivery(delivery).await {
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

    async fn handle_delivery(&self, mut delivery: Delivery) -> Control {
        if let Err(e) = delivery.ack().await {
            warn!("确认消息失败: {} {}", delivery.queue, e);
        }
        counter!("audiobot_messages_consumed_total", "consumer" => "scheduler").increment(1);

        let reaped = self.in_flight.lock().await.reap().await;
        if reaped > 0 {
            debug!("回收 {} 个已结束的任务单元", reaped);
        }

        let message = match WireMessage::decode(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                warn!("丢弃无法解析的消息: queue={} {}", delivery.queue, e);
                counter!("audiobot_messages_malformed_total", "consumer" => "scheduler")
                    .increment(1);
                return Control::Continue;
            }
        };

        match message.body {
            WireBody::Job(job) => {
                let job_type = job.job_type;
                if let Err(e) = self.jobs.register(job).await {
                    warn!("作业注册失败: {} {}", job_type, e);
                }
                Control::Continue
            }
            WireBody::Task(task) => self.handle_task(task).await,
        }
    }

    async fn handle_task(&self, task: Task) -> Control {
        match &task.task {
            TaskKind::Shutdown => {
                info!("收到关闭命令: {:?}", task.task_key);
                self.status.update(&task, TaskStatus::InWorker).await;
                self.status.update(&task, TaskStatus::Done).await;
                Control::Stop
            }
            TaskKind::RunJob(args) => {
                let job_type = args.job_type;
                let runner = Arc::clone(&self.runner);
                let status = self.status.clone();
                let handle = tokio::spawn(async move {
                    run_direct_job(runner, status, task).await;
                });
                self.in_flight
                    .lock()
                    .await
                    .push(format!("run_job.{job_type}"), handle);
                Control::Continue
            }
            _ => {
                warn!("调度器无法执行该任务: {}", task.task_type());
                self.status.update(&task, TaskStatus::Failed).await;
                Control::Continue
            }
        }
    }

    async fn drain(&self) {
        *self.state.write().await = ConsumerState::Draining;

        let stuck_jobs = self.jobs.shutdown(self.drain_timeout).await;
        let stuck_tasks = self.in_flight.lock().await.drain(self.drain_timeout).await;
        if stuck_jobs + stuck_tasks > 0 {
            warn!(
                "关闭时放弃了 {} 个作业循环和 {} 个任务单元",
                stuck_jobs, stuck_tasks
            );
        }

        *self.state.write().await = ConsumerState::Stopped;
        info!("调度器 {} 已停止", self.consumer_id);
    }
}

/// 直接任务：立即运行一次作业，任务自己的状态记录跟随作业结果
async fn run_direct_job(runner: Arc<JobRunner>, status: StatusTracker, task: Task) {
    let TaskKind::RunJob(args) = &task.task else {
        return;
    };
    status.update(&task, TaskStatus::InWorker).await;

    let outcome = match runner.fire(args.job_type).await {
        Ok(TaskStatus::Done) => TaskStatus::Done,
        Ok(other) => {
            warn!("直接运行的作业未成功: {} {}", args.job_type, other);
            TaskStatus::Failed
        }
        Err(e) => {
            error!("直接运行作业失败: {} {}", args.job_type, e);
            TaskStatus::Failed
        }
    };
    status.update(&task, outcome).await;
}
