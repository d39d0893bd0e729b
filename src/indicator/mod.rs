//! Indicator light animation
//!
//! Each pattern runs on its own thread against one output line until the
//! job is stopped; the line is always parked at its off level on exit.

mod animator;
mod output;
mod pattern;

pub use animator::{IndicatorLine, Indicators};
#[cfg(test)]
pub use output::RecordingOutput;
pub use output::{SysfsGpioOutput, SysfsPwmOutput};
pub use pattern::{Pattern, PatternTimings};
