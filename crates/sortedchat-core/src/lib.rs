pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::SortedChatConfig;
pub use error::{Result, SortedChatError};
pub use events::{NotificationLevel, SessionEvent};
pub use types::*;
