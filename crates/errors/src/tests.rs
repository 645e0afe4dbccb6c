use crate::*;

#[test]
fn test_scheduler_error_display() {
    let not_found = SchedulerError::task_status_not_found("task-1");
    assert_eq!(not_found.to_string(), "任务状态记录未找到: task-1");

    let destination = SchedulerError::invalid_destination("Unknown");
    assert_eq!(destination.to_string(), "无效的投递目标: Unknown");

    let transport = SchedulerError::TransportFailure {
        attempts: 3,
        message: "connection reset".to_string(),
    };
    assert_eq!(
        transport.to_string(),
        "消息发布失败，已重试 3 次: connection reset"
    );

    let flood = SchedulerError::from(TelegramError::FloodWait { seconds: 42 });
    assert_eq!(flood.to_string(), "Telegram错误: 触发限流，需要等待 42 秒");
}

#[test]
fn test_flood_wait_seconds() {
    let flood = SchedulerError::Telegram(TelegramError::FloodWait { seconds: 17 });
    assert_eq!(flood.flood_wait_seconds(), Some(17));

    let other = SchedulerError::Telegram(TelegramError::ChannelInvalid("c".into()));
    assert_eq!(other.flood_wait_seconds(), None);
    assert_eq!(SchedulerError::Internal("x".into()).flood_wait_seconds(), None);
}

#[test]
fn test_error_classification() {
    assert!(SchedulerError::invalid_params("missing chat_key").is_validation());
    assert!(SchedulerError::entity_not_found("chat", "c1").is_validation());
    assert!(!SchedulerError::MessageQueue("down".into()).is_validation());

    assert!(SchedulerError::MessageQueue("down".into()).is_retryable());
    assert!(!SchedulerError::invalid_params("x").is_retryable());

    assert!(SchedulerError::ResourceExhausted("memory".into()).is_fatal());
    assert!(!SchedulerError::Serialization("x".into()).is_fatal());
}

#[test]
fn test_user_message_is_generic() {
    let flood = SchedulerError::Telegram(TelegramError::FloodWait { seconds: 5 });
    assert_eq!(flood.user_message(), "发生内部错误，请稍后重试");

    let transport = SchedulerError::TransportFailure {
        attempts: 5,
        message: "x".into(),
    };
    assert_eq!(transport.user_message(), "发生内部错误，请稍后重试");

    let missing = SchedulerError::entity_not_found("audio", "a1");
    assert_eq!(missing.user_message(), "请求的内容不存在或参数有误");
}

#[test]
fn test_from_serde_json() {
    let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let converted: SchedulerError = err.into();
    assert!(matches!(converted, SchedulerError::Serialization(_)));
}
