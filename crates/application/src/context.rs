use std::sync::Arc;
use std::time::Duration;

use audiobot_config::TaskTuningConfig;
use audiobot_domain::{LibraryStore, TaskStatusStore};
use rand::Rng;

use crate::publisher::TaskPublisher;
use crate::status::StatusTracker;

/// 任务和作业运行时共享的依赖
#[derive(Clone)]
pub struct TaskContext {
    pub status: StatusTracker,
    pub library: Arc<dyn LibraryStore>,
    pub publisher: Arc<TaskPublisher>,
    pub tuning: TaskTuningConfig,
}

impl TaskContext {
    pub fn new(
        status_store: Arc<dyn TaskStatusStore>,
        library: Arc<dyn LibraryStore>,
        publisher: Arc<TaskPublisher>,
        tuning: TaskTuningConfig,
    ) -> Self {
        Self {
            status: StatusTracker::new(status_store),
            library,
            publisher,
            tuning,
        }
    }

    pub fn status_store(&self) -> &Arc<dyn TaskStatusStore> {
        self.status.store()
    }

    /// 每次Telegram任务结束后的冷却时间
    pub fn cooldown(&self) -> Duration {
        random_duration(
            self.tuning.cooldown_min_seconds,
            self.tuning.cooldown_max_seconds,
        )
    }

    /// FloodWait 要求的等待时间加上随机抖动
    pub fn flood_wait_backoff(&self, seconds: u64) -> Duration {
        Duration::from_secs(seconds)
            + random_duration(
                self.tuning.flood_wait_jitter_min_seconds,
                self.tuning.flood_wait_jitter_max_seconds,
            )
    }
}

/// `[min, max]` 秒内的随机时长
pub fn random_duration(min_seconds: u64, max_seconds: u64) -> Duration {
    if max_seconds <= min_seconds {
        return Duration::from_secs(min_seconds);
    }
    let millis = rand::rng().random_range(min_seconds * 1000..=max_seconds * 1000);
    Duration::from_millis(millis)
}
