pub mod app_config;
pub mod database;
pub mod message_queue;
pub mod observability;
pub mod scheduler_worker;
pub mod tasks;

pub use app_config::*;
pub use database::*;
pub use message_queue::*;
pub use observability::*;
pub use scheduler_worker::*;
pub use tasks::*;
