use std::io::Write;

use crate::*;

#[test]
fn test_app_config_default() {
    let config = AppConfig::default();
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.message_queue.retry.max_retries, 5);
    assert_eq!(config.publisher.default_priority, 1);
    assert_eq!(config.tasks.cooldown_min_seconds, 15);
    assert_eq!(config.tasks.cooldown_max_seconds, 30);
    assert_eq!(config.scheduler.jobs.len(), 4);
    assert!(config.validate().is_ok());
}

#[test]
fn test_app_config_from_partial_toml() {
    let toml_str = r#"
[message_queue]
url = "amqp://localhost:5672/%2f"
max_priority = 5

[message_queue.retry]
max_retries = 2

[worker]
worker_id = "worker-eu-1"

[[worker.clients]]
name = "bot-a"
bot_token = "123:abc"

[[worker.clients]]
name = "bot-b"

[tasks]
cooldown_min_seconds = 0
cooldown_max_seconds = 0
archive_chat_id = -100123
"#;

    let config = AppConfig::from_toml(toml_str).expect("config should parse");
    assert_eq!(config.message_queue.max_priority, 5);
    assert_eq!(config.message_queue.retry.max_retries, 2);
    assert_eq!(config.message_queue.retry.initial_interval_ms, 200);
    assert_eq!(config.worker.worker_id, "worker-eu-1");
    assert_eq!(config.worker.clients.len(), 2);
    assert_eq!(config.worker.clients[1].bot_token, None);
    assert_eq!(config.worker.clients[1].api_url, "https://api.telegram.org");
    assert_eq!(config.tasks.archive_chat_id, -100123);
    assert_eq!(config.database.url, "sqlite://audiobot.db?mode=rwc");
}

#[test]
fn test_duplicate_client_names_rejected() {
    let toml_str = r#"
[[worker.clients]]
name = "bot-a"

[[worker.clients]]
name = "bot-a"
"#;
    let err = AppConfig::from_toml(toml_str).unwrap_err();
    assert!(err.to_string().contains("duplicate client session name"));
}

#[test]
fn test_job_trigger_must_be_unambiguous() {
    let mut config = AppConfig::default();
    config.scheduler.jobs = vec![JobScheduleConfig {
        job_type: "count_interactions".to_string(),
        interval_seconds: Some(60),
        start_offset_seconds: 0,
        cron: Some("0 * * * * *".to_string()),
        enabled: true,
    }];
    assert!(config.validate().is_err());

    config.scheduler.jobs[0].cron = None;
    assert!(config.validate().is_ok());

    config.scheduler.jobs[0].interval_seconds = Some(0);
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_ranges_rejected() {
    let mut config = AppConfig::default();
    config.tasks.cooldown_min_seconds = 40;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.message_queue.retry.multiplier = 0.5;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.message_queue.url = "redis://localhost".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_in_memory_broker_url() {
    let mut config = AppConfig::default();
    assert!(!config.message_queue.is_in_memory());
    config.message_queue.url = "memory://local".to_string();
    assert!(config.message_queue.is_in_memory());
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_from_file_and_round_trip() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    let toml = AppConfig::default().to_toml().expect("serialize");
    file.write_all(toml.as_bytes()).expect("write");

    let path = file.path().to_string_lossy().to_string();
    let loaded = AppConfig::load(Some(&path)).expect("load");
    assert_eq!(loaded.scheduler.jobs, AppConfig::default().scheduler.jobs);
    assert_eq!(loaded.tasks, AppConfig::default().tasks);
}

#[test]
fn test_load_missing_file_fails() {
    let err = AppConfig::load(Some("/nonexistent/audiobot.toml")).unwrap_err();
    assert!(err.to_string().contains("配置文件不存在"));
}
