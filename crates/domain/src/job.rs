//! 周期作业
//!
//! 作业只由调度器进程执行。作业以 `job_type` 为标识，重复注册会替换已有的作业。

use std::str::FromStr;

use audiobot_config::JobScheduleConfig;
use audiobot_errors::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::task::DEFAULT_TASK_PRIORITY;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    CountInteractions,
    ForwardAudios,
    CheckUsernames,
    IndexChannels,
    #[serde(other)]
    Unknown,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::CountInteractions => "count_interactions",
            JobType::ForwardAudios => "forward_audios",
            JobType::CheckUsernames => "check_usernames",
            JobType::IndexChannels => "index_channels",
            JobType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count_interactions" => Ok(JobType::CountInteractions),
            "forward_audios" => Ok(JobType::ForwardAudios),
            "check_usernames" => Ok(JobType::CheckUsernames),
            "index_channels" => Ok(JobType::IndexChannels),
            _ => Err(format!("Invalid job type: {s}")),
        }
    }
}

/// 作业触发器
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// 注册后先等待 `start_offset_seconds`，之后每 `period_seconds` 触发一次
    Interval {
        period_seconds: u64,
        #[serde(default)]
        start_offset_seconds: u64,
    },
    /// 6或7段的CRON表达式（含秒），按UTC计算
    Cron { expression: String },
}

impl Trigger {
    pub fn interval(period_seconds: u64, start_offset_seconds: u64) -> Self {
        Trigger::Interval {
            period_seconds,
            start_offset_seconds,
        }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Trigger::Cron {
            expression: expression.into(),
        }
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        match self {
            Trigger::Interval { period_seconds, .. } if *period_seconds == 0 => {
                Err(SchedulerError::InvalidTrigger {
                    expr: "interval".to_string(),
                    message: "间隔必须大于0".to_string(),
                })
            }
            Trigger::Interval { .. } => Ok(()),
            Trigger::Cron { expression } => parse_cron(expression).map(|_| ()),
        }
    }

    /// 计算严格晚于 `after` 的下一次触发时间。`anchor` 为作业注册时间。
    ///
    /// 错过的触发点不会补跑，多个错过的触发点合并为一次。
    pub fn next_fire_after(
        &self,
        anchor: DateTime<Utc>,
        after: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        match self {
            Trigger::Interval {
                period_seconds,
                start_offset_seconds,
            } => {
                self.validate()?;
                let first = anchor + Duration::seconds(*start_offset_seconds as i64);
                if after < first {
                    return Ok(Some(first));
                }
                let period = *period_seconds as i64;
                let elapsed = (after - first).num_seconds();
                let periods = elapsed / period + 1;
                Ok(Some(first + Duration::seconds(periods * period)))
            }
            Trigger::Cron { expression } => {
                let schedule = parse_cron(expression)?;
                Ok(schedule.after(&after).next())
            }
        }
    }
}

fn parse_cron(expression: &str) -> SchedulerResult<Schedule> {
    Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidTrigger {
        expr: expression.to_string(),
        message: e.to_string(),
    })
}

/// 作业注册：(job_type, trigger)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_type: JobType,
    pub trigger: Trigger,
    #[serde(default = "default_job_priority")]
    pub priority: u8,
}

fn default_job_priority() -> u8 {
    DEFAULT_TASK_PRIORITY
}

impl Job {
    pub fn new(job_type: JobType, trigger: Trigger) -> Self {
        Self {
            job_type,
            trigger,
            priority: DEFAULT_TASK_PRIORITY,
        }
    }

    /// 由配置构造作业注册
    pub fn from_config(config: &JobScheduleConfig) -> SchedulerResult<Self> {
        let job_type = config
            .job_type
            .parse::<JobType>()
            .map_err(SchedulerError::config_error)?;
        let trigger = match (&config.interval_seconds, &config.cron) {
            (Some(period), None) => Trigger::interval(*period, config.start_offset_seconds),
            (None, Some(expr)) => Trigger::cron(expr.clone()),
            _ => {
                return Err(SchedulerError::config_error(format!(
                    "作业 {} 必须且只能配置 interval_seconds 或 cron 之一",
                    config.job_type
                )))
            }
        };
        trigger.validate()?;
        Ok(Self::new(job_type, trigger))
    }
}

/// 作业的持久化配置，运行时由作业读取
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_type: JobType,
    pub is_active: bool,
    /// 作业上次成功运行时的水位线
    pub last_run_at: Option<DateTime<Utc>>,
}

impl JobConfig {
    pub fn new(job_type: JobType) -> Self {
        Self {
            job_type,
            is_active: true,
            last_run_at: None,
        }
    }
}
