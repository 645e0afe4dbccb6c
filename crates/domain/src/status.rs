use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务状态，只能向前推进：QUEUED → IN_WORKER → DONE | FAILED
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    InWorker,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InWorker => "IN_WORKER",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// 活跃状态的记录参与去重
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// 状态转换规则。发布阶段失败时允许 QUEUED → FAILED。
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::InWorker)
                | (TaskStatus::Queued, TaskStatus::Failed)
                | (TaskStatus::InWorker, TaskStatus::Done)
                | (TaskStatus::InWorker, TaskStatus::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(TaskStatus::Queued),
            "IN_WORKER" => Ok(TaskStatus::InWorker),
            "DONE" => Ok(TaskStatus::Done),
            "FAILED" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// 持久化的任务状态记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    pub key: String,
    pub task_type: String,
    pub fingerprint: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskStatusRecord {
    pub fn queued(task_type: impl Into<String>, fingerprint: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            key: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            fingerprint,
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 作业触发时记录的任务类型，例如 `job.count_interactions`
pub fn job_status_type(job_type: &str) -> String {
    format!("job.{job_type}")
}
