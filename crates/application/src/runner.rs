use std::sync::Arc;

use audiobot_domain::{
    job_status_type, JobConfig, JobType, Task, TaskStatus, TaskStatusRecord, TelegramClient,
};
use audiobot_errors::{SchedulerError, SchedulerResult};
use metrics::counter;
use tracing::{error, info, instrument, warn};

use crate::context::TaskContext;
use crate::registry::{JobRegistry, TaskRegistry};

/// 单次任务运行的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunOutcome {
    Done,
    Failed,
    /// 触发限流，已等待服务端要求的时长
    RateLimited { seconds: u64 },
    /// 没有对应的处理器
    Unhandled,
}

impl TaskRunOutcome {
    fn label(&self) -> &'static str {
        match self {
            TaskRunOutcome::Done => "done",
            TaskRunOutcome::Failed => "failed",
            TaskRunOutcome::RateLimited { .. } => "rate_limited",
            TaskRunOutcome::Unhandled => "unhandled",
        }
    }
}

/// Telegram任务的统一执行流程
///
/// IN_WORKER → 执行 → DONE / FAILED，FloodWait 时等待 `w + 抖动`，最后冷却。
/// 任何错误都在这里终止，不会传播到消费者循环。
pub struct TaskRunner {
    registry: Arc<TaskRegistry>,
    ctx: Arc<TaskContext>,
}

impl TaskRunner {
    pub fn new(registry: Arc<TaskRegistry>, ctx: Arc<TaskContext>) -> Self {
        Self { registry, ctx }
    }

    pub fn context(&self) -> &Arc<TaskContext> {
        &self.ctx
    }

    #[instrument(skip_all, fields(task_type = %task.task_type(), client = %client.name()))]
    pub async fn run(&self, task: &Task, client: &dyn TelegramClient) -> TaskRunOutcome {
        let outcome = self.execute(task, client).await;
        counter!(
            "audiobot_task_runs_total",
            "task_type" => task.task_type().as_str(),
            "outcome" => outcome.label()
        )
        .increment(1);
        outcome
    }

    async fn execute(&self, task: &Task, client: &dyn TelegramClient) -> TaskRunOutcome {
        let Some(handler) = self.registry.get(task.task_type()) else {
            warn!("没有可处理该任务的处理器: {}", task.task_type());
            self.update(task, TaskStatus::Failed).await;
            return TaskRunOutcome::Unhandled;
        };

        self.update(task, TaskStatus::InWorker).await;

        let outcome = match handler.execute(task, client, &self.ctx).await {
            Ok(()) => {
                self.update(task, TaskStatus::Done).await;
                info!("任务完成: {} {:?}", task.task_type(), task.task_key);
                TaskRunOutcome::Done
            }
            Err(e) => {
                self.update(task, TaskStatus::Failed).await;
                match e.flood_wait_seconds() {
                    Some(seconds) => {
                        let backoff = self.ctx.flood_wait_backoff(seconds);
                        warn!(
                            "任务触发限流，等待 {:.1}s: {} {:?}",
                            backoff.as_secs_f64(),
                            task.task_type(),
                            task.task_key
                        );
                        tokio::time::sleep(backoff).await;
                        TaskRunOutcome::RateLimited { seconds }
                    }
                    None => {
                        if e.is_validation() {
                            warn!("任务参数无效: {} {}", task.task_type(), e);
                        } else {
                            error!("任务执行失败: {} {}", task.task_type(), e);
                        }
                        TaskRunOutcome::Failed
                    }
                }
            }
        };

        tokio::time::sleep(self.ctx.cooldown()).await;
        outcome
    }

    async fn update(&self, task: &Task, status: TaskStatus) {
        self.ctx.status.update(task, status).await;
    }
}

/// 作业的一次触发
///
/// 每次触发都有一条 `job.<type>` 状态记录；作业配置被停用时直接标记失败，不做任何工作。
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    ctx: Arc<TaskContext>,
}

impl JobRunner {
    pub fn new(registry: Arc<JobRegistry>, ctx: Arc<TaskContext>) -> Self {
        Self { registry, ctx }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// 运行一次作业，返回该次触发的最终状态
    #[instrument(skip(self))]
    pub async fn fire(&self, job_type: JobType) -> SchedulerResult<TaskStatus> {
        let handler = self.registry.get(job_type).ok_or_else(|| {
            SchedulerError::invalid_params(format!("未注册的作业类型: {job_type}"))
        })?;

        let store = self.ctx.status_store();
        let record = TaskStatusRecord::queued(job_status_type(job_type.as_str()), None);
        store.create_task_status(&record).await?;
        self.ctx
            .status
            .mark_key(&record.key, TaskStatus::InWorker)
            .await?;

        let config = store
            .get_job_config(job_type)
            .await?
            .unwrap_or_else(|| JobConfig::new(job_type));

        let status = if !config.is_active {
            info!("作业已停用，跳过: {}", job_type);
            TaskStatus::Failed
        } else {
            match handler.execute(&self.ctx, &config).await {
                Ok(()) => {
                    info!("作业完成: {}", job_type);
                    TaskStatus::Done
                }
                Err(e) => {
                    error!("作业执行失败: {} {}", job_type, e);
                    TaskStatus::Failed
                }
            }
        };

        self.ctx.status.mark_key(&record.key, status).await?;
        counter!(
            "audiobot_job_firings_total",
            "job_type" => job_type.as_str(),
            "status" => status.as_str()
        )
        .increment(1);
        Ok(status)
    }
}
