use async_trait::async_trait;
use audiobot_domain::{JobConfig, JobType, Task};
use audiobot_errors::SchedulerResult;

use crate::context::TaskContext;
use crate::jobs::publish_batch;
use crate::registry::JobHandler;

/// 为尚未检查的用户名发布检查任务
pub struct CheckUsernamesJob;

#[async_trait]
impl JobHandler for CheckUsernamesJob {
    fn job_type(&self) -> JobType {
        JobType::CheckUsernames
    }

    async fn execute(&self, ctx: &TaskContext, _config: &JobConfig) -> SchedulerResult<()> {
        let usernames = ctx
            .library
            .list_unchecked_usernames(ctx.tuning.job_batch_size)
            .await?;
        let tasks = usernames
            .into_iter()
            .map(|username| Task::check_username(username.key))
            .collect();
        publish_batch(ctx, "check_usernames", tasks).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context_with;
    use audiobot_domain::{TaskKind, UsernameRecord};
    use audiobot_testing_utils::{MockLibraryStore, MockTaskStatusStore, RecordingBroker, decode_task_kind};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_pauses_between_groups() {
        let mut library = MockLibraryStore::new();
        for i in 0..5 {
            library = library.with_username(UsernameRecord::unchecked(
                format!("u{i}"),
                format!("name_{i}"),
            ));
        }
        let mut checked = UsernameRecord::unchecked("u9", "done_name");
        checked.is_checked = true;
        library = library.with_username(checked);

        let broker = RecordingBroker::new();
        let mut ctx = context_with(&MockTaskStatusStore::new(), &library, Arc::new(broker.clone()));
        ctx.tuning.job_publish_pause_every = 2;
        ctx.tuning.job_publish_pause_ms = 1_000;

        let started = tokio::time::Instant::now();
        CheckUsernamesJob
            .execute(&ctx, &JobConfig::new(JobType::CheckUsernames))
            .await
            .unwrap();

        assert_eq!(broker.published_count(), 5);
        assert!(broker
            .published()
            .iter()
            .all(|m| matches!(decode_task_kind(&m.payload), TaskKind::CheckUsername(_))));
        // 5 个任务，每 2 个暂停一次
        assert!(started.elapsed() >= std::time::Duration::from_secs(2));
    }
}
