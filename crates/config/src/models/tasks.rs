use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// Pacing and batching knobs for concrete tasks and jobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskTuningConfig {
    /// Randomized cooldown after every Telegram-bound task run
    pub cooldown_min_seconds: u64,
    pub cooldown_max_seconds: u64,
    /// Extra wait added on top of a FloodWait duration
    pub flood_wait_jitter_min_seconds: u64,
    pub flood_wait_jitter_max_seconds: u64,
    /// Indexing persists its offset every N processed messages
    pub index_offset_persist_every: usize,
    /// Upper bound of messages read by one indexing run
    pub index_max_messages_per_run: usize,
    /// Size of the working set enumerated by one job firing
    pub job_batch_size: usize,
    /// Jobs pause after publishing this many tasks
    pub job_publish_pause_every: usize,
    pub job_publish_pause_ms: u64,
    /// Destination chat for archived audio
    pub archive_chat_id: i64,
}

impl Default for TaskTuningConfig {
    fn default() -> Self {
        Self {
            cooldown_min_seconds: 15,
            cooldown_max_seconds: 30,
            flood_wait_jitter_min_seconds: 5,
            flood_wait_jitter_max_seconds: 15,
            index_offset_persist_every: 50,
            index_max_messages_per_run: 2_000,
            job_batch_size: 100,
            job_publish_pause_every: 10,
            job_publish_pause_ms: 1_000,
            archive_chat_id: 0,
        }
    }
}

impl ConfigValidator for TaskTuningConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_range(
            self.cooldown_min_seconds,
            self.cooldown_max_seconds,
            "tasks.cooldown",
        )?;
        ValidationUtils::validate_range(
            self.flood_wait_jitter_min_seconds,
            self.flood_wait_jitter_max_seconds,
            "tasks.flood_wait_jitter",
        )?;
        ValidationUtils::validate_count(
            self.index_offset_persist_every,
            "tasks.index_offset_persist_every",
            10_000,
        )?;
        ValidationUtils::validate_count(
            self.index_max_messages_per_run,
            "tasks.index_max_messages_per_run",
            1_000_000,
        )?;
        ValidationUtils::validate_count(self.job_batch_size, "tasks.job_batch_size", 10_000)?;
        ValidationUtils::validate_count(
            self.job_publish_pause_every,
            "tasks.job_publish_pause_every",
            10_000,
        )?;
        Ok(())
    }
}
