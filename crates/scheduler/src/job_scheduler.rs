use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audiobot_application::JobRunner;
use audiobot_domain::{Job, JobType, Trigger};
use audiobot_errors::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 把 tokio 单调时钟映射到 UTC 时间
///
/// 触发时间按 UTC 计算，等待用 tokio 的时钟，暂停时间的测试里两者保持一致。
#[derive(Debug, Clone, Copy)]
struct JobClock {
    utc: DateTime<Utc>,
    instant: Instant,
}

impl JobClock {
    fn start() -> Self {
        Self {
            utc: Utc::now(),
            instant: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().duration_since(self.instant);
        self.utc + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn until(&self, at: DateTime<Utc>) -> Duration {
        (at - self.now()).to_std().unwrap_or(Duration::ZERO)
    }
}

struct ScheduledJob {
    job: Job,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// 进程内的作业调度器
///
/// 每个作业类型最多一个调度循环，重复注册会替换已有的循环。
/// 错过的触发点合并为一次，延迟的触发照常执行。
pub struct JobScheduler {
    runner: Arc<JobRunner>,
    jobs: Mutex<HashMap<JobType, ScheduledJob>>,
    accepting: AtomicBool,
}

impl JobScheduler {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self {
            runner,
            jobs: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// 注册作业，已有同类型作业时替换
    pub async fn register(&self, job: Job) -> SchedulerResult<()> {
        if !self.runner.registry().contains(job.job_type) {
            return Err(SchedulerError::invalid_params(format!(
                "未注册的作业类型: {}",
                job.job_type
            )));
        }
        job.trigger.validate()?;

        let mut jobs = self.jobs.lock().await;
        // 持锁后再检查，shutdown 先置位再清空作业表
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::Internal(
                "调度器正在关闭，拒绝注册作业".to_string(),
            ));
        }
        if let Some(previous) = jobs.remove(&job.job_type) {
            info!("替换已有作业: {} {:?}", job.job_type, previous.job.trigger);
            // 正在执行的触发会完成，之后循环退出
            let _ = previous.stop.send(true);
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_job_loop(
            self.runner.clone(),
            job.job_type,
            job.trigger.clone(),
            stop_rx,
        ));
        info!("作业已注册: {} {:?}", job.job_type, job.trigger);
        jobs.insert(job.job_type, ScheduledJob { job, stop, handle });
        Ok(())
    }

    /// 当前已注册的作业，按类型名排序
    pub async fn registered(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .await
            .values()
            .map(|scheduled| scheduled.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.job_type.as_str());
        jobs
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// 停止所有触发，等待正在执行的触发完成
    ///
    /// 返回超时后仍未结束的作业循环数量。
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.accepting.store(false, Ordering::SeqCst);
        let scheduled: Vec<ScheduledJob> = self.jobs.lock().await.drain().map(|(_, s)| s).collect();
        for job in &scheduled {
            let _ = job.stop.send(true);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut remaining = 0;
        for job in scheduled {
            match tokio::time::timeout_at(deadline, job.handle).await {
                Ok(Ok(())) => debug!("作业循环已退出: {}", job.job.job_type),
                Ok(Err(e)) => error!("作业循环异常退出: {} {}", job.job.job_type, e),
                Err(_) => {
                    warn!("等待作业结束超时: {}", job.job.job_type);
                    remaining += 1;
                }
            }
        }
        info!("作业调度器已停止");
        remaining
    }
}

async fn run_job_loop(
    runner: Arc<JobRunner>,
    job_type: JobType,
    trigger: Trigger,
    mut stop: watch::Receiver<bool>,
) {
    let clock = JobClock::start();
    let anchor = clock.now();

    loop {
        let next = match trigger.next_fire_after(anchor, clock.now()) {
            Ok(Some(next)) => next,
            Ok(None) => {
                info!("作业没有后续触发时间: {}", job_type);
                return;
            }
            Err(e) => {
                error!("计算作业触发时间失败: {} {}", job_type, e);
                return;
            }
        };
        debug!("作业 {} 下次触发: {}", job_type, next);

        tokio::select! {
            _ = tokio::time::sleep(clock.until(next)) => {}
            _ = stop.changed() => {
                debug!("作业循环收到停止信号: {}", job_type);
                return;
            }
        }
        if *stop.borrow() {
            return;
        }

        match runner.fire(job_type).await {
            Ok(status) => debug!("作业触发结束: {} {}", job_type, status),
            Err(e) => error!("作业触发失败: {} {}", job_type, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_paused_time() {
        let clock = JobClock::start();
        let start = clock.now();
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!((clock.now() - start).num_seconds(), 90);
        assert_eq!(clock.until(start + chrono::Duration::seconds(100)), Duration::from_secs(10));
        assert_eq!(clock.until(start), Duration::ZERO);
    }
}
