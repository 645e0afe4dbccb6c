use std::collections::VecDeque;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

/// 消费者状态：STOPPED → RUNNING → DRAINING → STOPPED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerState {
    #[default]
    Stopped,
    Running,
    Draining,
}

impl ConsumerState {
    pub fn accepts_work(&self) -> bool {
        matches!(self, ConsumerState::Running)
    }
}

/// 正在执行的任务单元，按启动顺序保存
#[derive(Debug, Default)]
pub struct InFlight {
    units: VecDeque<(String, JoinHandle<()>)>,
    failed: usize,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, handle: JoinHandle<()>) {
        self.units.push_back((label.into(), handle));
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// 异常退出（panic 或被取消）的单元累计数量
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// 回收已结束的单元并记录其结果，返回回收数量
    pub async fn reap(&mut self) -> usize {
        let before = self.units.len();
        let mut pending = VecDeque::with_capacity(before);
        while let Some((label, handle)) = self.units.pop_front() {
            if handle.is_finished() {
                self.settle(&label, handle.await);
            } else {
                pending.push_back((label, handle));
            }
        }
        self.units = pending;
        before - self.units.len()
    }

    fn settle(&mut self, label: &str, result: Result<(), JoinError>) {
        match result {
            Ok(()) => debug!("任务单元已完成: {}", label),
            Err(e) => {
                self.failed += 1;
                error!("任务单元异常退出: {} {}", label, e);
            }
        }
    }

    /// 按FIFO顺序等待所有单元结束；超时后放弃剩余单元并返回其数量
    pub async fn drain(&mut self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        while let Some((label, handle)) = self.units.pop_front() {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(result) => self.settle(&label, result),
                Err(_) => {
                    let remaining = self.units.len() + 1;
                    warn!("等待任务单元超时，剩余 {} 个", remaining);
                    self.units.clear();
                    return remaining;
                }
            }
        }
        0
    }
}
