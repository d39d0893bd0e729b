//! Digital input monitoring for the wake switch and the two buttons
//!
//! Each physical line is sampled on its own thread, debounced, and turned
//! into press/release callbacks plus a synchronous "is active" query.

mod debounce;
mod line;
mod monitor;

pub use line::SysfsInputLine;
#[cfg(test)]
pub use line::SimulatedLine;
pub use monitor::{CallbackId, InputMonitor, InputSettings};
