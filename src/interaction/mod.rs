//! Default interaction handlers backed by external commands
//!
//! The language model, text-to-speech and capture tools are separate
//! programs; these handlers sequence them and drive the indicators around
//! each phase.

mod command;
mod handlers;
mod text;

pub use handlers::CommandInteractions;
