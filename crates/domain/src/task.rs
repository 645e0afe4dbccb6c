//! 任务信封
//!
//! 任务由封闭的 [`TaskKind`] 枚举描述，每个变体携带强类型参数（kwargs）。
//! 线上格式为 `{"type": "...", "kwargs": {...}}`，未知类型反序列化为 `Unknown`，
//! 以便新旧版本的生产者与消费者可以独立部署。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::job::JobType;

/// 任务类型标签，用于状态记录和处理器注册
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ForwardAudio,
    CheckUsername,
    IndexChannel,
    RunJob,
    Shutdown,
    #[serde(other)]
    Unknown,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ForwardAudio => "forward_audio",
            TaskType::CheckUsername => "check_username",
            TaskType::IndexChannel => "index_channel",
            TaskType::RunJob => "run_job",
            TaskType::Shutdown => "shutdown",
            TaskType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward_audio" => Ok(TaskType::ForwardAudio),
            "check_username" => Ok(TaskType::CheckUsername),
            "index_channel" => Ok(TaskType::IndexChannel),
            "run_job" => Ok(TaskType::RunJob),
            "shutdown" => Ok(TaskType::Shutdown),
            _ => Err(format!("Invalid task type: {s}")),
        }
    }
}

/// 任务投递目标，决定消息发布到哪个交换机
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetWorkerType {
    /// 任意一个空闲的Telegram客户端
    AnyTelegramClient,
    /// 指定名称的Telegram客户端，发布时必须提供路由键
    OneSpecificTelegramClient,
    /// 广播给所有消费者进程的命令
    RabbitmqConsumerCommand,
    /// 调度器进程
    SchedulerJob,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardAudioArgs {
    pub audio_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckUsernameArgs {
    pub username_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChannelArgs {
    pub chat_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunJobArgs {
    pub job_type: JobType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "kwargs", rename_all = "snake_case")]
pub enum TaskKind {
    ForwardAudio(ForwardAudioArgs),
    CheckUsername(CheckUsernameArgs),
    IndexChannel(IndexChannelArgs),
    /// 在调度器进程内立即执行一次指定作业
    RunJob(RunJobArgs),
    Shutdown,
    #[serde(other)]
    Unknown,
}

impl TaskKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskKind::ForwardAudio(_) => TaskType::ForwardAudio,
            TaskKind::CheckUsername(_) => TaskType::CheckUsername,
            TaskKind::IndexChannel(_) => TaskType::IndexChannel,
            TaskKind::RunJob(_) => TaskType::RunJob,
            TaskKind::Shutdown => TaskType::Shutdown,
            TaskKind::Unknown => TaskType::Unknown,
        }
    }

    pub fn default_target(&self) -> TargetWorkerType {
        match self {
            TaskKind::ForwardAudio(_) | TaskKind::CheckUsername(_) | TaskKind::IndexChannel(_) => {
                TargetWorkerType::AnyTelegramClient
            }
            TaskKind::RunJob(_) => TargetWorkerType::SchedulerJob,
            TaskKind::Shutdown => TargetWorkerType::RabbitmqConsumerCommand,
            TaskKind::Unknown => TargetWorkerType::Unknown,
        }
    }

    /// 参数指纹：对kwargs做键排序后的规范JSON，再取SHA-256十六进制。
    /// 无参数任务返回 `None`。
    pub fn fingerprint(&self) -> Option<String> {
        let value = serde_json::to_value(self).ok()?;
        let kwargs = value.get("kwargs")?;
        if kwargs.is_null() || kwargs.as_object().is_some_and(|map| map.is_empty()) {
            return None;
        }
        let digest = Sha256::digest(canonical_json(kwargs).as_bytes());
        Some(format!("{digest:x}"))
    }
}

/// 以递归排序键的方式输出JSON，与serde_json的map实现无关
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(key.clone()),
                        canonical_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

pub const DEFAULT_TASK_PRIORITY: u8 = 1;

/// 可分发的任务信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task: TaskKind,
    pub target_worker_type: TargetWorkerType,
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// 指向状态记录的键，首次发布后才会设置
    #[serde(default)]
    pub task_key: Option<String>,
}

fn default_priority() -> u8 {
    DEFAULT_TASK_PRIORITY
}

impl Task {
    pub fn new(kind: TaskKind) -> Self {
        let target_worker_type = kind.default_target();
        Self {
            task: kind,
            target_worker_type,
            priority: DEFAULT_TASK_PRIORITY,
            task_key: None,
        }
    }

    pub fn forward_audio(audio_key: impl Into<String>) -> Self {
        Self::new(TaskKind::ForwardAudio(ForwardAudioArgs {
            audio_key: audio_key.into(),
        }))
    }

    pub fn check_username(username_key: impl Into<String>) -> Self {
        Self::new(TaskKind::CheckUsername(CheckUsernameArgs {
            username_key: username_key.into(),
        }))
    }

    pub fn index_channel(chat_key: impl Into<String>) -> Self {
        Self::new(TaskKind::IndexChannel(IndexChannelArgs {
            chat_key: chat_key.into(),
        }))
    }

    pub fn run_job(job_type: JobType) -> Self {
        Self::new(TaskKind::RunJob(RunJobArgs { job_type }))
    }

    pub fn shutdown() -> Self {
        Self::new(TaskKind::Shutdown)
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: TargetWorkerType) -> Self {
        self.target_worker_type = target;
        self
    }

    pub fn task_type(&self) -> TaskType {
        self.task.task_type()
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.task.fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_of_task_kind() {
        let kind = TaskKind::CheckUsername(CheckUsernameArgs {
            username_key: "u1".to_string(),
        });
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(
            value,
            json!({"type": "check_username", "kwargs": {"username_key": "u1"}})
        );

        let shutdown = serde_json::to_value(TaskKind::Shutdown).unwrap();
        assert_eq!(shutdown, json!({"type": "shutdown"}));
    }

    #[test]
    fn test_unknown_task_type_is_tolerated() {
        let kind: TaskKind =
            serde_json::from_value(json!({"type": "transcribe_audio"})).unwrap();
        assert_eq!(kind, TaskKind::Unknown);
        assert_eq!(kind.task_type(), TaskType::Unknown);
        assert_eq!(kind.default_target(), TargetWorkerType::Unknown);

        let target: TargetWorkerType = serde_json::from_value(json!("gpu_worker")).unwrap();
        assert_eq!(target, TargetWorkerType::Unknown);
    }

    #[test]
    fn test_fingerprint_is_stable_and_parameter_sensitive() {
        let a = Task::check_username("u1");
        let b = Task::check_username("u1");
        let c = Task::check_username("u2");

        assert!(a.fingerprint().is_some());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());

        assert_ne!(
            Task::index_channel("x").fingerprint(),
            Task::forward_audio("x").fingerprint()
        );
        assert_eq!(a.fingerprint().map(|f| f.len()), Some(64));
    }

    #[test]
    fn test_empty_kwargs_have_no_fingerprint() {
        assert_eq!(Task::shutdown().fingerprint(), None);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let left = json!({"b": 1, "a": {"d": [1, 2], "c": "x"}});
        let right = json!({"a": {"c": "x", "d": [1, 2]}, "b": 1});
        assert_eq!(canonical_json(&left), canonical_json(&right));
        assert_eq!(canonical_json(&left), r#"{"a":{"c":"x","d":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_default_targets() {
        assert_eq!(
            Task::forward_audio("a").target_worker_type,
            TargetWorkerType::AnyTelegramClient
        );
        assert_eq!(
            Task::run_job(JobType::CountInteractions).target_worker_type,
            TargetWorkerType::SchedulerJob
        );
        assert_eq!(
            Task::shutdown().target_worker_type,
            TargetWorkerType::RabbitmqConsumerCommand
        );
        assert_eq!(Task::shutdown().priority, DEFAULT_TASK_PRIORITY);
    }

    #[test]
    fn test_task_type_round_trip_through_str() {
        for task_type in [
            TaskType::ForwardAudio,
            TaskType::CheckUsername,
            TaskType::IndexChannel,
            TaskType::RunJob,
            TaskType::Shutdown,
        ] {
            assert_eq!(task_type.as_str().parse::<TaskType>().unwrap(), task_type);
        }
        assert!("unknown".parse::<TaskType>().is_err());
    }
}
