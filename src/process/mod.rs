//! Supervision of the external speech-to-text listener

mod listener;
mod supervisor;

pub use listener::{ListenerCommand, TokioLauncher};
pub use supervisor::ProcessSupervisor;
