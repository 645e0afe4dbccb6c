use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use audiobot_application::{
    JobRegistry, JobRunner, PublishOptions, PublishOutcome, StatusTracker, TaskContext,
    TaskPublisher, TaskRegistry, TaskRunner,
};
use audiobot_config::AppConfig;
use audiobot_domain::{
    Job, LibraryStore, MessageBroker, Task, TaskStatusStore, TelegramClient, Topology,
};
use audiobot_infrastructure::{
    BotApiClient, DatabaseManager, MessageBrokerFactory, SystemMemoryProbe,
};
use audiobot_scheduler::{JobScheduler, SchedulerConsumer};
use audiobot_worker::{ClientPool, ClientWorkerConsumer};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 进程运行的消费者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Scheduler,
    Worker,
    /// 同一进程内运行调度器和工作进程，适合内存消息代理
    All,
}

/// 连接好的共享服务
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    broker: Arc<dyn MessageBroker>,
    topology: Arc<Topology>,
    status_store: Arc<dyn TaskStatusStore>,
    publisher: Arc<TaskPublisher>,
    ctx: Arc<TaskContext>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        let broker = MessageBrokerFactory::create(&config.message_queue)
            .await
            .context("连接消息代理失败")?;
        let topology = Arc::new(Topology::from_config(&config.message_queue));

        let status_store: Arc<dyn TaskStatusStore> = Arc::new(database.task_status_store());
        let library: Arc<dyn LibraryStore> = Arc::new(database.library_store());
        let publisher = Arc::new(TaskPublisher::new(
            broker.clone(),
            status_store.clone(),
            Arc::new(SystemMemoryProbe::new()),
            topology.clone(),
            config.message_queue.retry.clone(),
            config.publisher.clone(),
        ));
        let ctx = Arc::new(TaskContext::new(
            status_store.clone(),
            library,
            publisher.clone(),
            config.tasks.clone(),
        ));

        Ok(Self {
            config,
            database,
            broker,
            topology,
            status_store,
            publisher,
            ctx,
        })
    }

    /// 运行消费者，直到收到关闭命令或关闭信号
    pub async fn run(&self, mode: AppMode, shutdown: broadcast::Sender<()>) -> Result<()> {
        let result = match mode {
            AppMode::Scheduler => self.run_scheduler(shutdown.subscribe()).await,
            AppMode::Worker => self.run_worker(shutdown.subscribe()).await,
            AppMode::All => {
                let (scheduler, worker) = tokio::join!(
                    self.run_scheduler(shutdown.subscribe()),
                    self.run_worker(shutdown.subscribe())
                );
                scheduler.and(worker)
            }
        };

        if let Err(e) = self.broker.close().await {
            warn!("关闭消息代理失败: {}", e);
        }
        self.database.close().await;
        result
    }

    async fn run_scheduler(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let runner = Arc::new(JobRunner::new(
            Arc::new(JobRegistry::with_defaults()),
            self.ctx.clone(),
        ));
        let jobs = Arc::new(JobScheduler::new(runner.clone()));

        for job_config in self.config.scheduler.jobs.iter().filter(|j| j.enabled) {
            let job = Job::from_config(job_config)
                .with_context(|| format!("作业配置无效: {}", job_config.job_type))?;
            jobs.register(job).await?;
        }

        let consumer = SchedulerConsumer::new(
            format!("scheduler-{}", host_name()),
            self.broker.clone(),
            self.topology.clone(),
            jobs,
            runner,
            StatusTracker::new(self.status_store.clone()),
            Duration::from_secs(self.config.scheduler.drain_timeout_seconds),
        );
        consumer.run(shutdown).await.context("调度器运行失败")
    }

    async fn run_worker(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let clients = self
            .config
            .worker
            .clients
            .iter()
            .map(|session| {
                BotApiClient::new(session).map(|c| Arc::new(c) as Arc<dyn TelegramClient>)
            })
            .collect::<Result<Vec<_>, _>>()
            .context("创建Telegram客户端失败")?;
        let pool = ClientPool::new(clients)?;
        info!("Telegram客户端: {:?}", pool.names().collect::<Vec<_>>());

        let runner = Arc::new(TaskRunner::new(
            Arc::new(TaskRegistry::with_defaults()),
            self.ctx.clone(),
        ));
        let consumer = ClientWorkerConsumer::new(
            self.config.worker.worker_id.clone(),
            self.broker.clone(),
            self.topology.clone(),
            pool,
            runner,
            Duration::from_secs(self.config.worker.drain_timeout_seconds),
        );
        consumer.run(shutdown).await.context("工作进程运行失败")
    }

    pub async fn publish(&self, mut task: Task, options: PublishOptions) -> Result<PublishOutcome> {
        let outcome = self.publisher.publish(&mut task, options).await;
        self.finish(outcome).await
    }

    pub async fn register_job(&self, job: &Job) -> Result<()> {
        let outcome = self.publisher.register_job(job).await;
        self.finish(outcome).await
    }

    async fn finish<T>(&self, outcome: audiobot_errors::SchedulerResult<T>) -> Result<T> {
        if let Err(e) = self.broker.close().await {
            error!("关闭消息代理失败: {}", e);
        }
        self.database.close().await;
        Ok(outcome?)
    }
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
