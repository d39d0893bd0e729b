//! Pattern definitions and the render loop

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::output::IndicatorOutput;
use crate::lifecycle::CancelToken;

pub(super) const OFF: f32 = 0.0;
pub(super) const ON: f32 = 1.0;

/// Temporal profile of an indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Short on, longer off: steady "working"
    Flashing,
    /// Randomised on/off: waiting on something slow
    Erratic,
    /// Dimming pulse, rising faster than it falls: listening or speaking
    Breathing,
    /// Held on: capturing input
    Constant,
}

impl Pattern {
    /// Whether the pattern needs a dimmable output
    pub fn needs_levels(self) -> bool {
        matches!(self, Pattern::Breathing)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Flashing => write!(f, "flashing"),
            Pattern::Erratic => write!(f, "erratic"),
            Pattern::Breathing => write!(f, "breathing"),
            Pattern::Constant => write!(f, "constant"),
        }
    }
}

/// Timing knobs for every pattern
#[derive(Debug, Clone)]
pub struct PatternTimings {
    pub flash_on: Duration,
    pub flash_off: Duration,
    /// Inclusive bounds in milliseconds
    pub erratic_on_ms: (u64, u64),
    pub erratic_off_ms: (u64, u64),
    pub breath_rise: Duration,
    pub breath_fall: Duration,
    pub breath_step: Duration,
    /// How often a constant output is re-asserted
    pub constant_refresh: Duration,
}

impl Default for PatternTimings {
    fn default() -> Self {
        Self {
            flash_on: Duration::from_millis(50),
            flash_off: Duration::from_millis(170),
            erratic_on_ms: (10, 35),
            erratic_off_ms: (10, 350),
            breath_rise: Duration::from_millis(100),
            breath_fall: Duration::from_millis(800),
            breath_step: Duration::from_millis(1),
            constant_refresh: Duration::from_millis(100),
        }
    }
}

/// Best-effort output writer; reports the first failure and keeps going
struct Driver<'a> {
    output: &'a mut dyn IndicatorOutput,
    line: &'a str,
    failing: bool,
}

impl Driver<'_> {
    fn set(&mut self, level: f32) {
        match self.output.set_level(level) {
            Ok(()) => self.failing = false,
            Err(e) if !self.failing => {
                warn!(line = %self.line, error = %e, "failed to drive indicator");
                self.failing = true;
            }
            Err(e) => debug!(line = %self.line, error = %e, "indicator still failing"),
        }
    }
}

/// Render `pattern` until `cancel` fires
///
/// Cancellation is checked at every half-cycle and every ramp step. The
/// caller is responsible for parking the output afterwards.
pub(super) fn render(
    pattern: Pattern,
    timings: &PatternTimings,
    output: &mut dyn IndicatorOutput,
    line: &str,
    cancel: &CancelToken,
) {
    let mut driver = Driver {
        output,
        line,
        failing: false,
    };
    let mut rng = rand::thread_rng();

    while !cancel.is_cancelled() {
        let completed = match pattern {
            Pattern::Flashing => blink(&mut driver, timings.flash_on, timings.flash_off, cancel),
            Pattern::Erratic => {
                let (on_lo, on_hi) = timings.erratic_on_ms;
                let (off_lo, off_hi) = timings.erratic_off_ms;
                let on = Duration::from_millis(rng.gen_range(on_lo..=on_hi));
                let off = Duration::from_millis(rng.gen_range(off_lo..=off_hi));
                blink(&mut driver, on, off, cancel)
            }
            Pattern::Breathing => {
                ramp(&mut driver, timings.breath_rise, timings.breath_step, cancel, |x| x)
                    && ramp(&mut driver, timings.breath_fall, timings.breath_step, cancel, |x| ON - x)
            }
            Pattern::Constant => {
                driver.set(ON);
                !cancel.wait_timeout(timings.constant_refresh)
            }
        };
        if !completed {
            break;
        }
    }
}

fn blink(driver: &mut Driver<'_>, on: Duration, off: Duration, cancel: &CancelToken) -> bool {
    driver.set(ON);
    if cancel.wait_timeout(on) {
        return false;
    }
    driver.set(OFF);
    !cancel.wait_timeout(off)
}

fn ramp(
    driver: &mut Driver<'_>,
    duration: Duration,
    step: Duration,
    cancel: &CancelToken,
    shape: impl Fn(f32) -> f32,
) -> bool {
    let steps = (duration.as_micros() / step.as_micros().max(1)).max(1) as u32;
    for i in 0..=steps {
        driver.set(shape(i as f32 / steps as f32));
        if cancel.wait_timeout(step) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_relationships() {
        let t = PatternTimings::default();
        assert!(t.flash_off >= t.flash_on);
        assert!(t.breath_rise < t.breath_fall);
        assert!(t.erratic_on_ms.0 <= t.erratic_on_ms.1);
        assert!(t.erratic_off_ms.0 <= t.erratic_off_ms.1);
        assert!(t.breath_step < t.breath_rise);
    }

    #[test]
    fn test_only_breathing_needs_levels() {
        assert!(Pattern::Breathing.needs_levels());
        assert!(!Pattern::Flashing.needs_levels());
        assert!(!Pattern::Erratic.needs_levels());
        assert!(!Pattern::Constant.needs_levels());
    }

    #[test]
    fn test_pattern_serialization() {
        let json = serde_json::to_string(&Pattern::Breathing).unwrap();
        assert_eq!(json, "\"breathing\"");
        assert_eq!(Pattern::Erratic.to_string(), "erratic");
    }
}
