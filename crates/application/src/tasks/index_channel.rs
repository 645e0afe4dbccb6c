use std::collections::BTreeSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use audiobot_domain::{
    AudioRecord, ChatRecord, MessageFilter, Task, TaskKind, TaskType, TelegramClient, TgMessage,
};
use audiobot_errors::{SchedulerError, SchedulerResult, TelegramError};
use futures::StreamExt;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::context::TaskContext;
use crate::registry::TaskHandler;

static USERNAME_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w@])@([A-Za-z][A-Za-z0-9_]{4,31})\b")
        .expect("username pattern is a valid regex")
});

/// 提取文本中提到的 `@username`，统一转为小写并去重
pub fn extract_usernames(text: &str) -> Vec<String> {
    let usernames: BTreeSet<String> = USERNAME_MENTION
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect();
    usernames.into_iter().collect()
}

/// 从上次的偏移量继续读取频道历史，保存音频并收集说明文字中的用户名
///
/// 每处理 N 条消息持久化一次偏移量；遇到限流或其他错误时先保存已完成的进度再返回。
pub struct IndexChannelTask;

struct IndexProgress {
    offset_id: i64,
    usernames: BTreeSet<String>,
    since_persist: usize,
    processed: usize,
    audios: usize,
}

impl IndexChannelTask {
    async fn process_message(
        &self,
        chat: &ChatRecord,
        message: &TgMessage,
        progress: &mut IndexProgress,
        ctx: &TaskContext,
    ) -> SchedulerResult<()> {
        if let Some(audio) = &message.audio {
            ctx.library
                .upsert_audio(&AudioRecord {
                    key: uuid::Uuid::new_v4().to_string(),
                    chat_id: chat.chat_id,
                    message_id: message.id,
                    file_id: audio.file_id.clone(),
                    file_unique_id: audio.file_unique_id.clone(),
                    title: audio.title.clone(),
                    performer: audio.performer.clone(),
                    duration: audio.duration,
                    is_document: audio.is_document,
                    archived_message_id: None,
                })
                .await?;
            progress.audios += 1;
        }

        if let Some(content) = message.content() {
            let own = chat.username.as_deref().map(str::to_lowercase);
            progress.usernames.extend(
                extract_usernames(content)
                    .into_iter()
                    .filter(|u| Some(u) != own.as_ref()),
            );
        }

        progress.offset_id = progress.offset_id.max(message.id);
        progress.processed += 1;
        progress.since_persist += 1;
        Ok(())
    }

    async fn persist(
        &self,
        chat: &ChatRecord,
        progress: &mut IndexProgress,
        ctx: &TaskContext,
    ) -> SchedulerResult<()> {
        if !progress.usernames.is_empty() {
            let usernames: Vec<String> = std::mem::take(&mut progress.usernames)
                .into_iter()
                .collect();
            let added = ctx.library.add_unchecked_usernames(&usernames).await?;
            debug!("频道 {} 新增 {} 个待检查用户名", chat.key, added);
        }
        ctx.library
            .update_chat_offset(&chat.key, progress.offset_id)
            .await?;
        progress.since_persist = 0;
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for IndexChannelTask {
    fn task_type(&self) -> TaskType {
        TaskType::IndexChannel
    }

    async fn execute(
        &self,
        task: &Task,
        client: &dyn TelegramClient,
        ctx: &TaskContext,
    ) -> SchedulerResult<()> {
        let TaskKind::IndexChannel(args) = &task.task else {
            return Err(SchedulerError::invalid_params("不是频道索引任务"));
        };

        let chat = ctx
            .library
            .get_chat(&args.chat_key)
            .await?
            .ok_or_else(|| SchedulerError::entity_not_found("chat", args.chat_key.as_str()))?;
        if !chat.is_valid {
            return Err(SchedulerError::invalid_params(format!(
                "频道已被标记为无效: {}",
                chat.key
            )));
        }

        let persist_every = ctx.tuning.index_offset_persist_every.max(1);
        let max_messages = ctx.tuning.index_max_messages_per_run;
        let mut progress = IndexProgress {
            offset_id: chat.last_message_offset_id,
            usernames: BTreeSet::new(),
            since_persist: 0,
            processed: 0,
            audios: 0,
        };

        let mut messages =
            client.iter_messages(chat.chat_id, chat.last_message_offset_id, MessageFilter::Audio);
        let result: SchedulerResult<()> = loop {
            if progress.processed >= max_messages {
                debug!("频道 {} 达到单次索引上限 {}", chat.key, max_messages);
                break Ok(());
            }
            match messages.next().await {
                None => break Ok(()),
                Some(Ok(message)) => {
                    self.process_message(&chat, &message, &mut progress, ctx)
                        .await?;
                    if progress.since_persist >= persist_every {
                        self.persist(&chat, &mut progress, ctx).await?;
                    }
                }
                Some(Err(TelegramError::ChannelInvalid(id))) => {
                    warn!("频道无效，标记并停止索引: {} ({})", chat.key, id);
                    if let Err(e) = ctx.library.mark_chat_invalid(&chat.key).await {
                        break Err(e);
                    }
                    break Err(TelegramError::ChannelInvalid(id).into());
                }
                Some(Err(e)) => break Err(e.into()),
            }
        };
        drop(messages);

        self.persist(&chat, &mut progress, ctx).await?;
        info!(
            "频道 {} 索引进度: 处理 {} 条消息，{} 个音频，偏移量 {}",
            chat.key, progress.processed, progress.audios, progress.offset_id
        );
        result
    }
}
