use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// One Telegram client session served by a worker process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSessionConfig {
    /// Session name; doubles as the routing key of its dedicated queue
    pub name: String,
    /// Bot API token; sessions without a token cannot be started by the bundled client
    pub bot_token: Option<String>,
    #[serde(default = "default_bot_api_url")]
    pub api_url: String,
}

fn default_bot_api_url() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub clients: Vec<ClientSessionConfig>,
    /// Seconds to wait for in-flight tasks after a shutdown command
    pub drain_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-001".to_string(),
            clients: Vec::new(),
            drain_timeout_seconds: 120,
        }
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.worker_id, "worker.worker_id")?;
        let mut names = std::collections::HashSet::new();
        for client in &self.clients {
            ValidationUtils::validate_not_empty(&client.name, "worker.clients.name")?;
            if !names.insert(client.name.as_str()) {
                return Err(crate::ConfigError::Validation(format!(
                    "duplicate client session name: {}",
                    client.name
                )));
            }
        }
        Ok(())
    }
}

/// A job registered by the scheduler at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobScheduleConfig {
    pub job_type: String,
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub start_offset_seconds: u64,
    pub cron: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub jobs: Vec<JobScheduleConfig>,
    pub drain_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jobs: vec![
                JobScheduleConfig {
                    job_type: "count_interactions".to_string(),
                    interval_seconds: Some(3600),
                    start_offset_seconds: 60,
                    cron: None,
                    enabled: true,
                },
                JobScheduleConfig {
                    job_type: "index_channels".to_string(),
                    interval_seconds: Some(600),
                    start_offset_seconds: 30,
                    cron: None,
                    enabled: true,
                },
                JobScheduleConfig {
                    job_type: "check_usernames".to_string(),
                    interval_seconds: Some(900),
                    start_offset_seconds: 45,
                    cron: None,
                    enabled: true,
                },
                JobScheduleConfig {
                    job_type: "forward_audios".to_string(),
                    interval_seconds: Some(1800),
                    start_offset_seconds: 90,
                    cron: None,
                    enabled: true,
                },
            ],
            drain_timeout_seconds: 120,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        for job in &self.jobs {
            ValidationUtils::validate_not_empty(&job.job_type, "scheduler.jobs.job_type")?;
            match (job.interval_seconds, &job.cron) {
                (Some(0), _) => {
                    return Err(crate::ConfigError::Validation(format!(
                        "scheduler job {} has a zero interval",
                        job.job_type
                    )))
                }
                (Some(_), Some(_)) | (None, None) => {
                    return Err(crate::ConfigError::Validation(format!(
                        "scheduler job {} must set exactly one of interval_seconds or cron",
                        job.job_type
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}
