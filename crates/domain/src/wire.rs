//! 线上消息格式
//!
//! 所有消息都带有版本号，消费者拒绝无法识别的版本。

use audiobot_errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};

use crate::job::Job;
use crate::task::Task;

pub const WIRE_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireBody {
    Task(Task),
    Job(Job),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub version: u16,
    pub body: WireBody,
}

impl WireMessage {
    pub fn task(task: Task) -> Self {
        Self {
            version: WIRE_VERSION,
            body: WireBody::Task(task),
        }
    }

    pub fn job(job: Job) -> Self {
        Self {
            version: WIRE_VERSION,
            body: WireBody::Job(job),
        }
    }

    pub fn encode(&self) -> SchedulerResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> SchedulerResult<Self> {
        let message: WireMessage = serde_json::from_slice(payload)?;
        if message.version != WIRE_VERSION {
            return Err(SchedulerError::Serialization(format!(
                "不支持的消息版本: {}",
                message.version
            )));
        }
        Ok(message)
    }
}
