use async_trait::async_trait;
use audiobot_domain::{ChatIdentifier, ChatKind, Task, TaskKind, TaskType, TelegramClient};
use audiobot_errors::{SchedulerError, SchedulerResult, TelegramError};
use tracing::{debug, info};

use crate::context::TaskContext;
use crate::registry::TaskHandler;

/// 解析用户名：属于频道则关联到频道记录，否则标记为无效
pub struct CheckUsernameTask;

#[async_trait]
impl TaskHandler for CheckUsernameTask {
    fn task_type(&self) -> TaskType {
        TaskType::CheckUsername
    }

    async fn execute(
        &self,
        task: &Task,
        client: &dyn TelegramClient,
        ctx: &TaskContext,
    ) -> SchedulerResult<()> {
        let TaskKind::CheckUsername(args) = &task.task else {
            return Err(SchedulerError::invalid_params("不是用户名检查任务"));
        };

        let username = ctx
            .library
            .get_username(&args.username_key)
            .await?
            .ok_or_else(|| {
                SchedulerError::entity_not_found("username", args.username_key.as_str())
            })?;

        if username.is_checked {
            debug!("用户名已检查过: @{}", username.username);
            return Ok(());
        }

        match client
            .get_chat(&ChatIdentifier::Username(username.username.clone()))
            .await
        {
            Ok(chat) if matches!(chat.kind, ChatKind::Channel | ChatKind::Supergroup) => {
                let chat_key = ctx
                    .library
                    .link_username_to_chat(&username.key, &chat)
                    .await?;
                info!("用户名 @{} 关联到频道 {}", username.username, chat_key);
                Ok(())
            }
            Ok(chat) => {
                info!("用户名 @{} 不是频道 ({:?})，标记为无效", username.username, chat.kind);
                ctx.library.mark_username_invalid(&username.key).await
            }
            Err(TelegramError::UsernameNotOccupied(_) | TelegramError::UsernameInvalid(_)) => {
                info!("用户名 @{} 不存在，标记为无效", username.username);
                ctx.library.mark_username_invalid(&username.key).await
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::TaskPublisher;
    use audiobot_config::{MessageQueueConfig, PublisherConfig};
    use audiobot_domain::{Topology, UsernameRecord};
    use audiobot_testing_utils::{
        fast_retry_policy, test_tuning, MockLibraryStore, MockMemoryProbe, MockTaskStatusStore,
        MockTelegramClient, RecordingBroker, TgChatBuilder,
    };
    use std::sync::Arc;

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

    fn library() -> MockLibraryStore {
        MockLibraryStore::new()
            .with_username(UsernameRecord::unchecked("u1", "music_channel"))
            .with_username(UsernameRecord::unchecked("u2", "nobody_here"))
            .with_username(UsernameRecord::unchecked("u3", "some_person"))
    }

    #[tokio::test]
    async fn test_channel_username_is_linked() {
        let library = library();
        let ctx = context(library.clone());
        let client = MockTelegramClient::new("c1").with_chat(
            TgChatBuilder::channel(-1005)
                .with_username("music_channel")
                .build(),
        );

        CheckUsernameTask
            .execute(&Task::check_username("u1"), &client, &ctx)
            .await
            .unwrap();

        let username = library.username("u1").unwrap();
        assert!(username.is_checked);
        assert!(username.is_valid);
        let chat_key = username.chat_key.unwrap();
        assert_eq!(library.chat(&chat_key).unwrap().chat_id, -1005);
    }

    #[tokio::test]
    async fn test_unoccupied_username_is_marked_invalid() {
        let library = library();
        let ctx = context(library.clone());
        let client = MockTelegramClient::new("c1");

        CheckUsernameTask
            .execute(&Task::check_username("u2"), &client, &ctx)
            .await
            .unwrap();

        let username = library.username("u2").unwrap();
        assert!(!username.is_valid);
        assert!(username.chat_key.is_none());
    }

    #[tokio::test]
    async fn test_private_chat_is_marked_invalid() {
        let library = library();
        let ctx = context(library.clone());
        let client = MockTelegramClient::new("c1").with_chat(
            TgChatBuilder::channel(42)
                .with_kind(ChatKind::Private)
                .with_username("some_person")
                .build(),
        );

        CheckUsernameTask
            .execute(&Task::check_username("u3"), &client, &ctx)
            .await
            .unwrap();
        assert!(!library.username("u3").unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_flood_wait_is_propagated() {
        let library = library();
        let ctx = context(library.clone());
        let client = MockTelegramClient::new("c1");
        client.fail_next_with(TelegramError::FloodWait { seconds: 12 });

        let err = CheckUsernameTask
            .execute(&Task::check_username("u1"), &client, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.flood_wait_seconds(), Some(12));
        assert!(!library.username("u1").unwrap().is_checked);
    }

    #[tokio::test]
    async fn test_missing_username_is_validation_error() {
        let ctx = context(library());
        let client = MockTelegramClient::new("c1");

        let err = CheckUsernameTask
            .execute(&Task::check_username("missing"), &client, &ctx)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(client.call_count(), 0);
    }
}
