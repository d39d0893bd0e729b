//! Interaction supervision
//!
//! Polls the three inputs at a fixed tick, derives a [`Mode`] and runs at
//! most one interaction handler per tick:
//! - Asleep / AwakeIdle: nothing
//! - AwakeTelevision: comment on what the television said
//! - AwakePerson: talk with the person at the intercom
//! - ComboArchive: archive the conversation, then boom

mod mode;
mod supervisor;

pub use mode::Mode;
#[cfg(test)]
pub use mode::InputSnapshot;
#[cfg(test)]
pub use supervisor::InputSource;
pub use supervisor::{Inputs, InteractionHandlers, InteractionSupervisor, InteractionTask};
