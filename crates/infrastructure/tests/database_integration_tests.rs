use audiobot_domain::{
    ArchivedAudio, AudioRecord, ChatKind, ChatRecord, InteractionCount, JobType, LibraryStore,
    TaskStatus, TaskStatusRecord, TaskStatusStore, TgChat,
};
use audiobot_errors::SchedulerError;
use audiobot_infrastructure::DatabaseManager;
use chrono::{Duration, Utc};

/// 测试数据库设置辅助函数
async fn setup_test_database() -> DatabaseManager {
    DatabaseManager::in_memory().await.unwrap()
}

fn audio(key: &str, chat_id: i64, message_id: i64) -> AudioRecord {
    AudioRecord {
        key: key.to_string(),
        chat_id,
        message_id,
        file_id: format!("file-{message_id}"),
        file_unique_id: format!("unique-{message_id}"),
        title: Some("Track".to_string()),
        performer: Some("Artist".to_string()),
        duration: Some(180),
        is_document: false,
        archived_message_id: None,
    }
}

#[tokio::test]
async fn test_task_status_lifecycle() {
    let db = setup_test_database().await;
    let store = db.task_status_store();

    let record = TaskStatusRecord::queued("check_username", Some("fp-1".to_string()));
    store.create_task_status(&record).await.unwrap();

    let active = store
        .get_active_task_status("check_username", Some("fp-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.key, record.key);
    assert_eq!(active.status, TaskStatus::Queued);

    assert!(store.update_task_status(&record.key, TaskStatus::InWorker).await.unwrap());
    assert!(store.update_task_status(&record.key, TaskStatus::Done).await.unwrap());

    // 终态之后的转换被忽略
    assert!(store.update_task_status(&record.key, TaskStatus::Failed).await.unwrap());
    let stored = store.get_task_status_by_key(&record.key).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Done);
    assert!(stored.updated_at >= stored.created_at);

    // 已完成的记录不再参与去重
    assert!(store
        .get_active_task_status("check_username", Some("fp-1"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_active_lookup_without_fingerprint() {
    let db = setup_test_database().await;
    let store = db.task_status_store();

    let record = TaskStatusRecord::queued("shutdown", None);
    store.create_task_status(&record).await.unwrap();

    let found = store.get_active_task_status("shutdown", None).await.unwrap();
    assert_eq!(found.map(|r| r.key), Some(record.key));
    assert!(store
        .get_active_task_status("shutdown", Some("other"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_missing_status_record() {
    let db = setup_test_database().await;
    let store = db.task_status_store();
    assert!(!store.update_task_status("missing", TaskStatus::Done).await.unwrap());
    assert!(store.get_task_status_by_key("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_job_config_and_watermark() {
    let db = setup_test_database().await;
    let store = db.task_status_store();

    let config = store
        .get_job_config(JobType::CountInteractions)
        .await
        .unwrap()
        .unwrap();
    assert!(config.is_active);
    assert!(config.last_run_at.is_none());

    let now = Utc::now();
    store
        .update_job_last_run(JobType::CountInteractions, now)
        .await
        .unwrap();
    store.set_job_active(JobType::CountInteractions, false).await.unwrap();

    let config = store
        .get_job_config(JobType::CountInteractions)
        .await
        .unwrap()
        .unwrap();
    assert!(!config.is_active);
    assert_eq!(config.last_run_at, Some(now));

    // 水位线不会回退
    store
        .update_job_last_run(JobType::CountInteractions, now - Duration::hours(1))
        .await
        .unwrap();
    let config = store
        .get_job_config(JobType::CountInteractions)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(config.last_run_at, Some(now));
}

#[tokio::test]
async fn test_chat_offsets_only_move_forward() {
    let db = setup_test_database().await;
    let library = db.library_store();

    library.insert_chat(&ChatRecord::new("chat-1", -1001)).await.unwrap();
    library.update_chat_offset("chat-1", 50).await.unwrap();
    library.update_chat_offset("chat-1", 20).await.unwrap();

    let chat = library.get_chat("chat-1").await.unwrap().unwrap();
    assert_eq!(chat.last_message_offset_id, 50);
    assert!(chat.last_indexed_at.is_some());

    library.mark_chat_invalid("chat-1").await.unwrap();
    assert!(library.list_chats_due_for_indexing(10).await.unwrap().is_empty());

    let err = library.update_chat_offset("nope", 1).await.unwrap_err();
    assert!(matches!(err, SchedulerError::EntityNotFound { .. }));
}

#[tokio::test]
async fn test_never_indexed_chats_come_first() {
    let db = setup_test_database().await;
    let library = db.library_store();

    library.insert_chat(&ChatRecord::new("old", -1)).await.unwrap();
    library.update_chat_offset("old", 10).await.unwrap();
    library.insert_chat(&ChatRecord::new("fresh", -2)).await.unwrap();

    let due = library.list_chats_due_for_indexing(10).await.unwrap();
    let keys: Vec<_> = due.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["fresh", "old"]);
}

#[tokio::test]
async fn test_usernames() {
    let db = setup_test_database().await;
    let library = db.library_store();

    let added = library
        .add_unchecked_usernames(&["Music".to_string(), "music".to_string(), "jazz".to_string()])
        .await
        .unwrap();
    assert_eq!(added, 2);

    let unchecked = library.list_unchecked_usernames(10).await.unwrap();
    assert_eq!(unchecked.len(), 2);
    let music = unchecked.iter().find(|u| u.username == "music").unwrap();
    let jazz = unchecked.iter().find(|u| u.username == "jazz").unwrap();

    let chat = TgChat {
        id: -1005,
        kind: ChatKind::Channel,
        username: Some("music".to_string()),
        title: Some("Music".to_string()),
        has_protected_content: false,
    };
    let chat_key = library.link_username_to_chat(&music.key, &chat).await.unwrap();
    let again = library.link_username_to_chat(&music.key, &chat).await.unwrap();
    assert_eq!(chat_key, again);

    let linked = library.get_username(&music.key).await.unwrap().unwrap();
    assert!(linked.is_checked);
    assert_eq!(linked.chat_key.as_deref(), Some(chat_key.as_str()));
    assert_eq!(library.get_chat(&chat_key).await.unwrap().unwrap().chat_id, -1005);

    library.mark_username_invalid(&jazz.key).await.unwrap();
    let invalid = library.get_username(&jazz.key).await.unwrap().unwrap();
    assert!(!invalid.is_valid);
    assert!(library.list_unchecked_usernames(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_audio_upsert_and_archive() {
    let db = setup_test_database().await;
    let library = db.library_store();

    let key = library.upsert_audio(&audio("a1", -1001, 5)).await.unwrap();
    assert_eq!(key, "a1");

    // 同一条消息再次写入时保留原来的键
    let again = library.upsert_audio(&audio("a2", -1001, 5)).await.unwrap();
    assert_eq!(again, "a1");
    assert_eq!(library.list_unarchived_audios(10).await.unwrap().len(), 1);

    library
        .create_archived_audio(&ArchivedAudio {
            source_audio_key: "a1".to_string(),
            archive_chat_id: -2002,
            archive_message_id: 77,
        })
        .await
        .unwrap();

    let stored = library.get_audio("a1").await.unwrap().unwrap();
    assert_eq!(stored.archived_message_id, Some(77));
    assert_eq!(stored.duration, Some(180));
    assert!(library.list_unarchived_audios(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_interaction_counts_window() {
    let db = setup_test_database().await;
    let library = db.library_store();
    library.upsert_audio(&audio("a1", -1001, 1)).await.unwrap();
    library.upsert_audio(&audio("a2", -1001, 2)).await.unwrap();

    let now = Utc::now();
    let watermark = now - Duration::hours(1);
    library.record_interaction("a1", now - Duration::hours(2)).await.unwrap();
    library.record_interaction("a1", now - Duration::minutes(30)).await.unwrap();
    library.record_interaction("a1", now - Duration::minutes(10)).await.unwrap();
    library.record_interaction("a2", now - Duration::minutes(5)).await.unwrap();

    let counts = library.count_interactions(Some(watermark), now).await.unwrap();
    assert_eq!(
        counts,
        vec![
            InteractionCount { audio_key: "a1".to_string(), count: 2 },
            InteractionCount { audio_key: "a2".to_string(), count: 1 },
        ]
    );

    let all = library.count_interactions(None, now).await.unwrap();
    assert_eq!(all[0].count, 3);

    assert!(library.interactions_counted_until().await.unwrap().is_none());
    assert!(library
        .apply_interaction_counts(Some(watermark), now, &counts)
        .await
        .unwrap());
    assert_eq!(library.interaction_count("a1").await.unwrap(), 2);
    assert_eq!(library.interaction_count("a2").await.unwrap(), 1);
    assert_eq!(library.interactions_counted_until().await.unwrap(), Some(now));
}

#[tokio::test]
async fn test_interaction_window_is_applied_once() {
    let db = setup_test_database().await;
    let library = db.library_store();
    library.upsert_audio(&audio("a1", -1001, 1)).await.unwrap();

    let now = Utc::now();
    let earlier = now - Duration::hours(1);
    let counts = vec![InteractionCount { audio_key: "a1".to_string(), count: 3 }];
    assert!(library.apply_interaction_counts(Some(earlier), now, &counts).await.unwrap());

    // 同一窗口、重叠窗口和更早的窗口都不会再次累加
    assert!(!library.apply_interaction_counts(Some(earlier), now, &counts).await.unwrap());
    assert!(!library
        .apply_interaction_counts(Some(now - Duration::minutes(1)), now + Duration::minutes(5), &counts)
        .await
        .unwrap());
    assert!(!library.apply_interaction_counts(None, now + Duration::minutes(5), &counts).await.unwrap());
    assert_eq!(library.interaction_count("a1").await.unwrap(), 3);

    let next = vec![InteractionCount { audio_key: "a1".to_string(), count: 1 }];
    assert!(library
        .apply_interaction_counts(Some(now), now + Duration::minutes(5), &next)
        .await
        .unwrap());
    assert_eq!(library.interaction_count("a1").await.unwrap(), 4);
    assert_eq!(
        library.interactions_counted_until().await.unwrap(),
        Some(now + Duration::minutes(5))
    );
}
