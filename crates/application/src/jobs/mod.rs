//! 调度器进程内运行的周期作业

mod check_usernames;
mod count_interactions;
mod forward_audios;
mod index_channels;

use std::time::Duration;

use audiobot_domain::Task;
use audiobot_errors::{SchedulerError, SchedulerResult};
use tracing::{info, warn};

use crate::context::TaskContext;
use crate::publisher::PublishOptions;

pub use check_usernames::CheckUsernamesJob;
pub use count_interactions::CountInteractionsJob;
pub use forward_audios::ForwardAudiosJob;
pub use index_channels::IndexChannelsJob;

/// 一批任务的发布统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub published: usize,
    pub deduplicated: usize,
    pub failed: usize,
}

/// 逐个发布任务，每发布 K 个暂停一次
///
/// 单个任务发布失败只记录日志；内存不足时整批中止。
pub(crate) async fn publish_batch(
    ctx: &TaskContext,
    label: &str,
    tasks: Vec<Task>,
) -> SchedulerResult<BatchSummary> {
    let pause_every = ctx.tuning.job_publish_pause_every;
    let pause = Duration::from_millis(ctx.tuning.job_publish_pause_ms);
    let mut summary = BatchSummary::default();

    for (index, mut task) in tasks.into_iter().enumerate() {
        if pause_every > 0 && index > 0 && index % pause_every == 0 {
            tokio::time::sleep(pause).await;
        }
        match ctx
            .publisher
            .publish(&mut task, PublishOptions::default())
            .await
        {
            Ok(outcome) if outcome.created => summary.published += 1,
            Ok(_) => summary.deduplicated += 1,
            Err(e @ SchedulerError::ResourceExhausted(_)) => {
                warn!("{}: 资源不足，中止本批发布", label);
                return Err(e);
            }
            Err(e) => {
                warn!("{}: 任务发布失败: {}", label, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "{}: 发布 {} 个任务，去重 {} 个，失败 {} 个",
        label, summary.published, summary.deduplicated, summary.failed
    );
    Ok(summary)
}
