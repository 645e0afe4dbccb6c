//! 在Telegram客户端上执行的具体任务

mod check_username;
mod forward_audio;
mod index_channel;

pub use check_username::CheckUsernameTask;
pub use forward_audio::ForwardAudioTask;
pub use index_channel::{extract_usernames, IndexChannelTask};
