use std::collections::HashMap;
use std::sync::Arc;

use audiobot_domain::TelegramClient;
use audiobot_errors::{SchedulerError, SchedulerResult};
use rand::seq::IndexedRandom;

/// 一个工作进程持有的Telegram客户端
///
/// 共享队列上的任务随机选择客户端，专属队列上的任务使用绑定的客户端。
#[derive(Clone)]
pub struct ClientPool {
    clients: Vec<Arc<dyn TelegramClient>>,
    by_name: HashMap<String, usize>,
}

impl ClientPool {
    pub fn new(clients: Vec<Arc<dyn TelegramClient>>) -> SchedulerResult<Self> {
        if clients.is_empty() {
            return Err(SchedulerError::config_error("工作进程至少需要一个Telegram客户端"));
        }
        let mut by_name = HashMap::new();
        for (index, client) in clients.iter().enumerate() {
            if by_name.insert(client.name().to_string(), index).is_some() {
                return Err(SchedulerError::config_error(format!(
                    "重复的客户端名称: {}",
                    client.name()
                )));
            }
        }
        Ok(Self { clients, by_name })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clients.iter().map(|c| c.name())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TelegramClient>> {
        self.by_name.get(name).map(|&i| self.clients[i].clone())
    }

    pub fn random(&self) -> Option<Arc<dyn TelegramClient>> {
        self.clients.choose(&mut rand::rng()).cloned()
    }
}
