//! # Audiobot Testing Utils
//!
//! Shared testing utilities for the audiobot workspace: in-memory doubles for the
//! status store, library store, Telegram client, message broker and memory probe,
//! plus builders for test data.
//!
//! ```toml
//! [dev-dependencies]
//! audiobot-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
