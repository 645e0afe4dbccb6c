use async_trait::async_trait;
use audiobot_domain::{JobConfig, JobType};
use audiobot_errors::SchedulerResult;
use chrono::Utc;
use tracing::{info, warn};

use crate::context::TaskContext;
use crate::registry::JobHandler;

/// 汇总上次水位线之后的交互次数
///
/// 计数和窗口终点在库存储的同一事务里写入，作业水位线随后推进。
/// 水位线写入失败时，下次触发从库里记下的终点继续，不会重复计数。
pub struct CountInteractionsJob;

#[async_trait]
impl JobHandler for CountInteractionsJob {
    fn job_type(&self) -> JobType {
        JobType::CountInteractions
    }

    async fn execute(&self, ctx: &TaskContext, config: &JobConfig) -> SchedulerResult<()> {
        let counted_until = ctx.library.interactions_counted_until().await?;
        let since = counted_until.max(config.last_run_at);
        let until = Utc::now();

        let counts = ctx.library.count_interactions(since, until).await?;
        if !ctx
            .library
            .apply_interaction_counts(since, until, &counts)
            .await?
        {
            warn!("交互窗口已被计入，跳过: {:?} - {}", since, until);
            return Ok(());
        }
        ctx.status_store()
            .update_job_last_run(JobType::CountInteractions, until)
            .await?;

        info!(
            "交互计数完成: {} 个音频, 窗口 {:?} - {}",
            counts.len(),
            since,
            until
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context_with;
    use audiobot_domain::{InteractionCount, LibraryStore};
    use audiobot_testing_utils::{MockLibraryStore, MockTaskStatusStore, RecordingBroker};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_counts_window_and_advances_watermark() {
        let now = Utc::now();
        let mut config = JobConfig::new(JobType::CountInteractions);
        config.last_run_at = Some(now - Duration::hours(1));

        let store = MockTaskStatusStore::new().with_job_config(config.clone());
        let library = MockLibraryStore::new()
            .with_interaction("a1", now - Duration::hours(2))
            .with_interaction("a1", now - Duration::minutes(30))
            .with_interaction("a1", now - Duration::minutes(10))
            .with_interaction("a2", now - Duration::minutes(5));
        let ctx = context_with(&store, &library, Arc::new(RecordingBroker::new()));

        CountInteractionsJob.execute(&ctx, &config).await.unwrap();

        let applied = library.applied_counts();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].audio_key, "a1");
        assert_eq!(applied[0].count, 2);
        assert_eq!(applied[1].count, 1);

        let watermark = store
            .job_config(JobType::CountInteractions)
            .unwrap()
            .last_run_at
            .unwrap();
        assert!(watermark > now - Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_failed_apply_keeps_watermark() {
        let config = JobConfig::new(JobType::CountInteractions);
        let store = MockTaskStatusStore::new().with_job_config(config.clone());
        let library = MockLibraryStore::new().with_interaction("a1", Utc::now());
        library.fail_applying_counts();
        let ctx = context_with(&store, &library, Arc::new(RecordingBroker::new()));

        assert!(CountInteractionsJob.execute(&ctx, &config).await.is_err());
        assert!(store.watermark_updates().is_empty());
        assert!(library.counted_until().is_none());
        assert_eq!(library.count_interactions_calls(), 1);
    }

    #[tokio::test]
    async fn test_lost_watermark_write_does_not_double_count() {
        let config = JobConfig::new(JobType::CountInteractions);
        let store = MockTaskStatusStore::new().with_job_config(config.clone());
        store.fail_watermark_updates();
        let library = MockLibraryStore::new().with_interaction("a1", Utc::now() - Duration::seconds(5));
        let ctx = context_with(&store, &library, Arc::new(RecordingBroker::new()));

        assert!(CountInteractionsJob.execute(&ctx, &config).await.is_err());
        assert_eq!(library.total_applied("a1"), 1);
        assert!(library.counted_until().is_some());

        // 作业配置里的水位线没有推进，下次触发仍然拿到旧配置
        let stale = store.job_config(JobType::CountInteractions).unwrap();
        assert!(stale.last_run_at.is_none());
        let _ = CountInteractionsJob.execute(&ctx, &stale).await;
        let _ = CountInteractionsJob.execute(&ctx, &stale).await;

        assert_eq!(library.total_applied("a1"), 1);
        assert_eq!(library.count_interactions_calls(), 3);
    }

    #[tokio::test]
    async fn test_overlapping_window_is_not_applied_twice() {
        let now = Utc::now();
        let library = MockLibraryStore::new().with_interaction("a1", now - Duration::minutes(1));

        assert!(library
            .apply_interaction_counts(None, now, &[InteractionCount { audio_key: "a1".into(), count: 1 }])
            .await
            .unwrap());
        assert!(!library
            .apply_interaction_counts(None, now, &[InteractionCount { audio_key: "a1".into(), count: 1 }])
            .await
            .unwrap());
        assert_eq!(library.total_applied("a1"), 1);
    }
}
