use std::sync::Arc;

use audiobot_domain::{Task, TaskStatus, TaskStatusStore};
use audiobot_errors::SchedulerResult;
use tracing::warn;

/// 按任务自身的 `task_key` 推进状态记录
///
/// 任务没有 `task_key` 或记录不存在时返回 `false`，调用方继续执行（记录丢失不影响任务本身）。
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn TaskStatusStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn TaskStatusStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStatusStore> {
        &self.store
    }

    pub async fn mark_in_worker(&self, task: &Task) -> SchedulerResult<bool> {
        self.transition(task, TaskStatus::InWorker).await
    }

    pub async fn mark_done(&self, task: &Task) -> SchedulerResult<bool> {
        self.transition(task, TaskStatus::Done).await
    }

    pub async fn mark_failed(&self, task: &Task) -> SchedulerResult<bool> {
        self.transition(task, TaskStatus::Failed).await
    }

    /// 推进状态，存储出错时只记录日志，调用方继续执行
    pub async fn update(&self, task: &Task, status: TaskStatus) {
        let result = match status {
            TaskStatus::InWorker => self.mark_in_worker(task).await,
            TaskStatus::Done => self.mark_done(task).await,
            TaskStatus::Failed => self.mark_failed(task).await,
            TaskStatus::Queued => return,
        };
        if let Err(e) = result {
            warn!("更新任务状态失败: {:?} -> {} {}", task.task_key, status, e);
        }
    }

    pub async fn mark_key(&self, key: &str, status: TaskStatus) -> SchedulerResult<bool> {
        let updated = self.store.update_task_status(key, status).await?;
        if !updated {
            warn!("任务状态记录不存在: {} -> {}", key, status);
        }
        Ok(updated)
    }

    async fn transition(&self, task: &Task, status: TaskStatus) -> SchedulerResult<bool> {
        match task.task_key.as_deref() {
            Some(key) => self.mark_key(key, status).await,
            None => {
                warn!("任务没有task_key，无法更新为 {}: {}", status, task.task_type());
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiobot_domain::TaskStatusRecord;
    use audiobot_testing_utils::MockTaskStatusStore;

    async fn queued_task(store: &MockTaskStatusStore) -> Task {
        let record = TaskStatusRecord::queued("forward_audio", None);
        store.create_task_status(&record).await.unwrap();
        let mut task = Task::forward_audio("a1");
        task.task_key = Some(record.key);
        task
    }

    #[tokio::test]
    async fn test_missing_key_returns_false() {
        let tracker = StatusTracker::new(Arc::new(MockTaskStatusStore::new()));
        let task = Task::forward_audio("a1");
        assert!(!tracker.mark_in_worker(&task).await.unwrap());

        let mut lost = Task::forward_audio("a1");
        lost.task_key = Some("missing".to_string());
        assert!(!tracker.mark_done(&lost).await.unwrap());
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let store = MockTaskStatusStore::new();
        let tracker = StatusTracker::new(Arc::new(store.clone()));
        let task = queued_task(&store).await;

        assert!(tracker.mark_in_worker(&task).await.unwrap());
        assert!(tracker.mark_done(&task).await.unwrap());
        assert!(tracker.mark_failed(&task).await.unwrap());
        assert!(tracker.mark_in_worker(&task).await.unwrap());

        let key = task.task_key.unwrap();
        assert_eq!(
            store.status_history(&key),
            vec![TaskStatus::Queued, TaskStatus::InWorker, TaskStatus::Done]
        );
        assert_eq!(store.record(&key).unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_update_swallows_store_errors() {
        let store = MockTaskStatusStore::new();
        let tracker = StatusTracker::new(Arc::new(store.clone()));
        let task = queued_task(&store).await;

        store.fail_status_updates();
        assert!(tracker.mark_in_worker(&task).await.is_err());
        tracker.update(&task, TaskStatus::InWorker).await;
        tracker.update(&task, TaskStatus::Failed).await;

        let key = task.task_key.unwrap();
        assert_eq!(store.record(&key).unwrap().status, TaskStatus::Queued);
        assert_eq!(store.status_history(&key), vec![TaskStatus::Queued]);
    }

    #[tokio::test]
    async fn test_update_moves_record_forward() {
        let store = MockTaskStatusStore::new();
        let tracker = StatusTracker::new(Arc::new(store.clone()));
        let task = queued_task(&store).await;

        tracker.update(&task, TaskStatus::Queued).await;
        tracker.update(&task, TaskStatus::InWorker).await;
        tracker.update(&task, TaskStatus::Failed).await;

        let key = task.task_key.unwrap();
        assert_eq!(
            store.status_history(&key),
            vec![TaskStatus::Queued, TaskStatus::InWorker, TaskStatus::Failed]
        );
    }
}
