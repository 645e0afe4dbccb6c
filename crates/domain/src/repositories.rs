//! 存储抽象
//!
//! 任务层只依赖这里的trait，具体实现在infrastructure中。

use async_trait::async_trait;
use audiobot_errors::SchedulerResult;
use chrono::{DateTime, Utc};

use crate::job::{JobConfig, JobType};
use crate::library::{ArchivedAudio, AudioRecord, ChatRecord, InteractionCount, UsernameRecord};
use crate::status::{TaskStatus, TaskStatusRecord};
use crate::telegram::TgChat;

/// 任务状态存储
#[async_trait]
pub trait TaskStatusStore: Send + Sync {
    async fn create_task_status(&self, record: &TaskStatusRecord) -> SchedulerResult<()>;

    /// 查找同类型、同指纹且处于活跃状态（QUEUED或IN_WORKER）的记录
    async fn get_active_task_status(
        &self,
        task_type: &str,
        fingerprint: Option<&str>,
    ) -> SchedulerResult<Option<TaskStatusRecord>>;

    async fn get_task_status_by_key(&self, key: &str) -> SchedulerResult<Option<TaskStatusRecord>>;

    /// 记录不存在时返回 `false`。非法的状态转换被忽略，记录保持原状。
    async fn update_task_status(&self, key: &str, status: TaskStatus) -> SchedulerResult<bool>;

    async fn get_job_config(&self, job_type: JobType) -> SchedulerResult<Option<JobConfig>>;

    /// 推进作业水位线，早于已记录时间的写入被忽略
    async fn update_job_last_run(
        &self,
        job_type: JobType,
        last_run_at: DateTime<Utc>,
    ) -> SchedulerResult<()>;
}

/// 频道、用户名和音频的存储
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn get_chat(&self, key: &str) -> SchedulerResult<Option<ChatRecord>>;
    async fn update_chat_offset(&self, key: &str, offset_id: i64) -> SchedulerResult<()>;
    async fn mark_chat_invalid(&self, key: &str) -> SchedulerResult<()>;
    async fn list_chats_due_for_indexing(&self, limit: usize) -> SchedulerResult<Vec<ChatRecord>>;

    async fn get_username(&self, key: &str) -> SchedulerResult<Option<UsernameRecord>>;
    async fn mark_username_invalid(&self, key: &str) -> SchedulerResult<()>;
    /// 把用户名关联到解析出的会话，会话不存在时新建，返回会话键
    async fn link_username_to_chat(&self, username_key: &str, chat: &TgChat)
        -> SchedulerResult<String>;
    /// 返回新增的用户名数量，已存在的用户名被忽略
    async fn add_unchecked_usernames(&self, usernames: &[String]) -> SchedulerResult<usize>;
    async fn list_unchecked_usernames(&self, limit: usize) -> SchedulerResult<Vec<UsernameRecord>>;

    async fn get_audio(&self, key: &str) -> SchedulerResult<Option<AudioRecord>>;
    /// 按 (chat_id, message_id) 去重写入，返回音频键
    async fn upsert_audio(&self, audio: &AudioRecord) -> SchedulerResult<String>;
    async fn create_archived_audio(&self, archived: &ArchivedAudio) -> SchedulerResult<()>;
    async fn list_unarchived_audios(&self, limit: usize) -> SchedulerResult<Vec<AudioRecord>>;

    async fn record_interaction(&self, audio_key: &str, at: DateTime<Utc>) -> SchedulerResult<()>;
    /// 统计 `(since, until]` 区间内的交互次数
    async fn count_interactions(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> SchedulerResult<Vec<InteractionCount>>;
    /// 已经累加进音频计数的交互截止时间
    async fn interactions_counted_until(&self) -> SchedulerResult<Option<DateTime<Utc>>>;
    /// 在同一事务内累加 `(since, until]` 的计数并记下 `until`
    ///
    /// 区间与已计入的部分重叠时不做任何修改并返回 `false`。
    async fn apply_interaction_counts(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
        counts: &[InteractionCount],
    ) -> SchedulerResult<bool>;
}
