pub mod job;
pub mod library;
pub mod messaging;
pub mod repositories;
pub mod status;
pub mod task;
pub mod telegram;
pub mod topology;
pub mod wire;

pub use audiobot_errors::{SchedulerError, SchedulerResult, TelegramError};
pub use job::*;
pub use library::*;
pub use messaging::*;
pub use repositories::*;
pub use status::*;
pub use task::*;
pub use telegram::*;
pub use topology::*;
pub use wire::*;
