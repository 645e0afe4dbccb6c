//! 处理器注册表
//!
//! 启动时显式注册所有任务和作业处理器，按类型分发。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use audiobot_domain::{JobConfig, JobType, Task, TaskType, TelegramClient};
use audiobot_errors::SchedulerResult;

use crate::context::TaskContext;
use crate::jobs::{CheckUsernamesJob, CountInteractionsJob, ForwardAudiosJob, IndexChannelsJob};
use crate::tasks::{CheckUsernameTask, ForwardAudioTask, IndexChannelTask};

/// 在Telegram客户端上执行的任务
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> TaskType;

    async fn execute(
        &self,
        task: &Task,
        client: &dyn TelegramClient,
        ctx: &TaskContext,
    ) -> SchedulerResult<()>;
}

/// 在调度器进程内执行的作业
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn execute(&self, ctx: &TaskContext, config: &JobConfig) -> SchedulerResult<()>;
}

#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置任务
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ForwardAudioTask));
        registry.register(Arc::new(CheckUsernameTask));
        registry.register(Arc::new(IndexChannelTask));
        registry
    }

    /// 同类型的处理器会被替换
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.task_type(), handler);
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        self.handlers.keys().copied().collect()
    }
}

#[derive(Default, Clone)]
pub struct JobRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CountInteractionsJob));
        registry.register(Arc::new(IndexChannelsJob));
        registry.register(Arc::new(CheckUsernamesJob));
        registry.register(Arc::new(ForwardAudiosJob));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registries() {
        let tasks = TaskRegistry::with_defaults();
        assert!(tasks.get(TaskType::ForwardAudio).is_some());
        assert!(tasks.get(TaskType::CheckUsername).is_some());
        assert!(tasks.get(TaskType::IndexChannel).is_some());
        assert!(tasks.get(TaskType::Shutdown).is_none());
        assert!(tasks.get(TaskType::Unknown).is_none());

        let jobs = JobRegistry::with_defaults();
        for job_type in [
            JobType::CountInteractions,
            JobType::IndexChannels,
            JobType::CheckUsernames,
            JobType::ForwardAudios,
        ] {
            assert!(jobs.contains(job_type));
        }
        assert!(!jobs.contains(JobType::Unknown));
    }
}
