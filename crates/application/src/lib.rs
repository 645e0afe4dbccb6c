//! 任务发布、状态跟踪，以及具体任务和作业的实现

pub mod context;
pub mod jobs;
pub mod lifecycle;
pub mod publisher;
pub mod registry;
pub mod runner;
pub mod status;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use context::{random_duration, TaskContext};
pub use jobs::BatchSummary;
pub use lifecycle::{ConsumerState, InFlight};
pub use publisher::{PublishOptions, PublishOutcome, TaskPublisher};
pub use registry::{JobHandler, JobRegistry, TaskHandler, TaskRegistry};
pub use runner::{JobRunner, TaskRunOutcome, TaskRunner};
pub use status::StatusTracker;
