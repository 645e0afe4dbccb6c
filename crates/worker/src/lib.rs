//! Telegram客户端工作进程
//!
//! 从专属队列、共享队列和命令队列消费任务，并发数等于客户端数量。

pub mod client_pool;
pub mod consumer;

pub use client_pool::ClientPool;
pub use consumer::{ClientWorkerConsumer, QueueSource};
