use async_trait::async_trait;
use audiobot_domain::{
    ArchivedAudio, AudioRecord, Task, TaskKind, TaskType, TelegramClient, TgAudio,
};
use audiobot_errors::{SchedulerError, SchedulerResult, TelegramError};
use tracing::{debug, info};

use crate::context::TaskContext;
use crate::registry::TaskHandler;

/// 将音频转发到归档频道，并记录从源音频到归档副本的边
///
/// 机器人账号无法转发受保护的内容，此时改为按 file_id 重新上传。
pub struct ForwardAudioTask;

impl ForwardAudioTask {
    async fn archive(
        &self,
        audio: &AudioRecord,
        archive_chat_id: i64,
        client: &dyn TelegramClient,
    ) -> SchedulerResult<i64> {
        match client
            .forward_messages(archive_chat_id, audio.chat_id, &[audio.message_id])
            .await
        {
            Ok(ids) => ids.first().copied().ok_or_else(|| {
                SchedulerError::TaskExecution("转发消息没有返回新消息ID".to_string())
            }),
            Err(TelegramError::ChatForwardsRestricted(chat)) if client.is_bot() => {
                debug!("会话禁止转发，改为重新上传: {}", chat);
                let file = TgAudio {
                    file_id: audio.file_id.clone(),
                    file_unique_id: audio.file_unique_id.clone(),
                    title: audio.title.clone(),
                    performer: audio.performer.clone(),
                    duration: audio.duration,
                    is_document: audio.is_document,
                };
                let message = if audio.is_document {
                    client.send_document(archive_chat_id, &file, None).await?
                } else {
                    client.send_audio(archive_chat_id, &file, None).await?
                };
                Ok(message.id)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TaskHandler for ForwardAudioTask {
    fn task_type(&self) -> TaskType {
        TaskType::ForwardAudio
    }

    async fn execute(
        &self,
        task: &Task,
        client: &dyn TelegramClient,
        ctx: &TaskContext,
    ) -> SchedulerResult<()> {
        let TaskKind::ForwardAudio(args) = &task.task else {
            return Err(SchedulerError::invalid_params("不是转发音频任务"));
        };
        let archive_chat_id = ctx.tuning.archive_chat_id;
        if archive_chat_id == 0 {
            return Err(SchedulerError::invalid_params("未配置归档频道"));
        }

        let audio = ctx
            .library
            .get_audio(&args.audio_key)
            .await?
            .ok_or_else(|| SchedulerError::entity_not_found("audio", args.audio_key.as_str()))?;

        if let Some(message_id) = audio.archived_message_id {
            debug!("音频已归档，跳过: {} -> {}", audio.key, message_id);
            return Ok(());
        }

        let archive_message_id = self.archive(&audio, archive_chat_id, client).await?;
        ctx.library
            .create_archived_audio(&ArchivedAudio {
                source_audio_key: audio.key.clone(),
                archive_chat_id,
                archive_message_id,
            })
            .await?;

        info!(
            "音频已归档: {} ({}:{}) -> {}",
            audio.key, audio.chat_id, audio.message_id, archive_message_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::TaskPublisher;
    use audiobot_config::{MessageQueueConfig, PublisherConfig};
    use audiobot_domain::Topology;
    use audiobot_testing_utils::{
        fast_retry_policy, test_tuning, AudioRecordBuilder, MockLibraryStore, MockMemoryProbe,
        MockTaskStatusStore, MockTelegramClient, RecordingBroker, TgChatBuilder,
        TgMessageBuilder,
    };
    use std::sync::Arc;

    const SOURCE: i64 = -1001;

    fn context(library: MockLibraryStore) -> TaskContext {
        let store = Arc::new(MockTaskStatusStore::new());
        let publisher = TaskPublisher::new(
            Arc::new(RecordingBroker::new()),
            store.clone(),
            Arc::new(MockMemoryProbe(None)),
            Arc::new(Topology::from_config(&MessageQueueConfig::default())),
            fast_retry_policy(0),
            PublisherConfig::default(),
        );
        TaskContext::new(store, Arc::new(library), Arc::new(publisher), test_tuning())
    }

    #[tokio::test]
    async fn test_forwards_and_records_archive_edge() {
        let library =
            MockLibraryStore::new().with_audio(AudioRecordBuilder::new("a1", SOURCE, 7).build());
        let ctx = context(library.clone());
        let client = MockTelegramClient::new("user-client")
            .with_chat(TgChatBuilder::channel(SOURCE).build())
            .with_messages(SOURCE, vec![TgMessageBuilder::audio(SOURCE, 7).build()]);

        ForwardAudioTask
            .execute(&Task::forward_audio("a1"), &client, &ctx)
            .await
            .unwrap();

        let forwarded = client.forwarded();
        assert_eq!(forwarded, vec![(ctx.tuning.archive_chat_id, SOURCE, vec![7])]);
        let archived = library.archived();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].source_audio_key, "a1");
        assert!(library.audio("a1").unwrap().archived_message_id.is_some());
    }

    #[tokio::test]
    async fn test_bot_reuploads_protected_audio() {
        let library = MockLibraryStore::new()
            .with_audio(AudioRecordBuilder::new("a1", SOURCE, 7).build())
            .with_audio(AudioRecordBuilder::new("a2", SOURCE, 8).as_document().build());
        let ctx = context(library.clone());
        let client = MockTelegramClient::bot("bot-client")
            .with_chat(TgChatBuilder::channel(SOURCE).protected().build());

        ForwardAudioTask
            .execute(&Task::forward_audio("a1"), &client, &ctx)
            .await
            .unwrap();
        ForwardAudioTask
            .execute(&Task::forward_audio("a2"), &client, &ctx)
            .await
            .unwrap();

        assert!(client.forwarded().is_empty());
        let sent = client.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "send_audio");
        assert_eq!(sent[0].2.file_id, "file--1001-7");
        assert_eq!(sent[1].0, "send_document");

        let archived = library.archived();
        assert_eq!(archived.len(), 2);
        assert_eq!(archived[0].source_audio_key, "a1");
        assert_eq!(archived[1].source_audio_key, "a2");
        assert_eq!(archived[0].archive_chat_id, ctx.tuning.archive_chat_id);
    }

    #[tokio::test]
    async fn test_user_client_protected_content_fails() {
        let library =
            MockLibraryStore::new().with_audio(AudioRecordBuilder::new("a1", SOURCE, 7).build());
        let ctx = context(library.clone());
        let client = MockTelegramClient::new("user-client")
            .with_chat(TgChatBuilder::channel(SOURCE).protected().build());

        let err = ForwardAudioTask
            .execute(&Task::forward_audio("a1"), &client, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Telegram(TelegramError::ChatForwardsRestricted(_))
        ));
        assert!(library.archived().is_empty());
    }

    #[tokio::test]
    async fn test_missing_audio_is_validation_error() {
        let ctx = context(MockLibraryStore::new());
        let client = MockTelegramClient::new("c1");

        let err = ForwardAudioTask
            .execute(&Task::forward_audio("missing"), &client, &ctx)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_already_archived_is_skipped() {
        let library = MockLibraryStore::new()
            .with_audio(AudioRecordBuilder::new("a1", SOURCE, 7).archived_as(99).build());
        let ctx = context(library.clone());
        let client = MockTelegramClient::new("c1");

        ForwardAudioTask
            .execute(&Task::forward_audio("a1"), &client, &ctx)
            .await
            .unwrap();
        assert_eq!(client.call_count(), 0);
        assert!(library.archived().is_empty());
    }
}
