//! Persisted conversation log

mod log;

pub use log::{ConversationLog, Role};
#[cfg(test)]
pub use log::Message;
