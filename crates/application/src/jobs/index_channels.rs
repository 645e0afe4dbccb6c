use async_trait::async_trait;
use audiobot_domain::{JobConfig, JobType, Task};
use audiobot_errors::SchedulerResult;

use crate::context::TaskContext;
use crate::jobs::publish_batch;
use crate::registry::JobHandler;

/// 为最久未索引的频道发布索引任务
pub struct IndexChannelsJob;

#[async_trait]
impl JobHandler for IndexChannelsJob {
    fn job_type(&self) -> JobType {
        JobType::IndexChannels
    }

    async fn execute(&self, ctx: &TaskContext, _config: &JobConfig) -> SchedulerResult<()> {
        let chats = ctx
            .library
            .list_chats_due_for_indexing(ctx.tuning.job_batch_size)
            .await?;
        let tasks = chats
            .into_iter()
            .map(|chat| Task::index_channel(chat.key))
            .collect();
        publish_batch(ctx, "index_channels", tasks).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context_with;
    use audiobot_domain::TaskKind;
    use audiobot_testing_utils::{
        decode_task_kind, ChatRecordBuilder, MockLibraryStore, MockTaskStatusStore,
        RecordingBroker,
    };
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publishes_one_task_per_due_chat() {
        let library = MockLibraryStore::new()
            .with_chat(
                ChatRecordBuilder::new("old", -1)
                    .indexed_at(Utc::now() - Duration::hours(3))
                    .build(),
            )
            .with_chat(ChatRecordBuilder::new("never", -2).build())
            .with_chat(ChatRecordBuilder::new("dead", -3).invalid().build());
        let broker = RecordingBroker::new();
        let store = MockTaskStatusStore::new();
        let ctx = context_with(&store, &library, Arc::new(broker.clone()));

        IndexChannelsJob
            .execute(&ctx, &JobConfig::new(JobType::IndexChannels))
            .await
            .unwrap();

        let keys: Vec<String> = broker
            .published()
            .iter()
            .map(|m| match decode_task_kind(&m.payload) {
                TaskKind::IndexChannel(args) => args.chat_key,
                other => panic!("unexpected task {other:?}"),
            })
            .collect();
        assert_eq!(keys, vec!["never", "old"]);

        // 第二次触发时任务仍在排队，全部去重
        IndexChannelsJob
            .execute(&ctx, &JobConfig::new(JobType::IndexChannels))
            .await
            .unwrap();
        assert_eq!(broker.published_count(), 2);
        assert_eq!(store.count(), 2);
    }
}
