//! Test helper utilities and common testing patterns

use audiobot_config::{MessageQueueConfig, RetryPolicyConfig, TaskTuningConfig};
use audiobot_domain::{Task, TaskKind, WireBody, WireMessage};
use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        condition().await
    }

    /// Generate unique test names
    pub fn unique_name(prefix: &str) -> String {
        format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
    }
}

/// Retry policy with millisecond backoff so publish tests stay fast
pub fn fast_retry_policy(max_retries: u32) -> RetryPolicyConfig {
    RetryPolicyConfig {
        max_retries,
        initial_interval_ms: 1,
        multiplier: 2.0,
        max_interval_ms: 4,
    }
}

/// Broker configuration pointing at the in-process broker
pub fn memory_queue_config() -> MessageQueueConfig {
    MessageQueueConfig {
        url: "memory://".to_string(),
        retry: fast_retry_policy(2),
        ..MessageQueueConfig::default()
    }
}

/// Tuning without cooldowns or pauses; FloodWait jitter stays at zero
pub fn test_tuning() -> TaskTuningConfig {
    TaskTuningConfig {
        cooldown_min_seconds: 0,
        cooldown_max_seconds: 0,
        flood_wait_jitter_min_seconds: 0,
        flood_wait_jitter_max_seconds: 0,
        index_offset_persist_every: 2,
        index_max_messages_per_run: 100,
        job_batch_size: 10,
        job_publish_pause_every: 0,
        job_publish_pause_ms: 0,
        archive_chat_id: -1009999,
    }
}

/// Decodes a published payload into the task it carries
pub fn decode_task(payload: &[u8]) -> Task {
    match WireMessage::decode(payload).expect("payload should decode").body {
        WireBody::Task(task) => task,
        other => panic!("expected a task, got {other:?}"),
    }
}

/// Decodes a published payload and returns its task kind
pub fn decode_task_kind(payload: &[u8]) -> TaskKind {
    decode_task(payload).task
}
