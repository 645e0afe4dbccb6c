//! 调度器进程：注册周期作业，执行直接提交的作业任务

pub mod consumer;
pub mod job_scheduler;

pub use consumer::SchedulerConsumer;
pub use job_scheduler::JobScheduler;
