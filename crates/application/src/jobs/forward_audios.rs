use async_trait::async_trait;
use audiobot_domain::{JobConfig, JobType, Task};
use audiobot_errors::{SchedulerError, SchedulerResult};

use crate::context::TaskContext;
use crate::jobs::publish_batch;
use crate::registry::JobHandler;

/// 为尚未归档的音频发布转发任务
pub struct ForwardAudiosJob;

#[async_trait]
impl JobHandler for ForwardAudiosJob {
    fn job_type(&self) -> JobType {
        JobType::ForwardAudios
    }

    async fn execute(&self, ctx: &TaskContext, _config: &JobConfig) -> SchedulerResult<()> {
        if ctx.tuning.archive_chat_id == 0 {
            return Err(SchedulerError::config_error("未配置归档频道"));
        }
        let audios = ctx
            .library
            .list_unarchived_audios(ctx.tuning.job_batch_size)
            .await?;
        let tasks = audios
            .into_iter()
            .map(|audio| Task::forward_audio(audio.key))
            .collect();
        publish_batch(ctx, "forward_audios", tasks).await?;
        Ok(())
    }
}
