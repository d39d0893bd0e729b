//! Raw digital input lines
//!
//! A [`DigitalLine`] reports the electrical level of one pin. Polarity and
//! debouncing are applied by the monitor on top of it.

use std::fs;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(test)]
use std::sync::Arc;

use tracing::debug;

use super::monitor::InputError;

/// Source of raw samples for one physical line
pub trait DigitalLine: Send + 'static {
    /// Read the current electrical level (`true` = high)
    fn read(&mut self) -> Result<bool, InputError>;
}

/// GPIO input exposed through the Linux sysfs interface
#[derive(Debug)]
pub struct SysfsInputLine {
    number: u32,
    value_path: PathBuf,
}

impl SysfsInputLine {
    /// Export the line if needed and configure it as an input
    pub fn open(gpio_root: &Path, number: u32) -> Result<Self, InputError> {
        let line_dir = gpio_root.join(format!("gpio{}", number));

        if !line_dir.exists() {
            debug!(line = number, "exporting gpio line");
            fs::write(gpio_root.join("export"), number.to_string())
                .map_err(|source| InputError::Io { line: number, source })?;
        }

        fs::write(line_dir.join("direction"), "in")
            .map_err(|source| InputError::Io { line: number, source })?;

        Ok(Self {
            number,
            value_path: line_dir.join("value"),
        })
    }
}

impl DigitalLine for SysfsInputLine {
    fn read(&mut self) -> Result<bool, InputError> {
        let raw = fs::read_to_string(&self.value_path).map_err(|source| InputError::Io {
            line: self.number,
            source,
        })?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(InputError::InvalidLevel {
                line: self.number,
                value: other.to_string(),
            }),
        }
    }
}

/// In-memory line driven by tests
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct SimulatedLine {
    level: Arc<AtomicBool>,
}

#[cfg(test)]
impl SimulatedLine {
    pub fn new(level: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(level)),
        }
    }

    pub fn set(&self, level: bool) {
        self.level.store(level, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl DigitalLine for SimulatedLine {
    fn read(&mut self) -> Result<bool, InputError> {
        Ok(self.level.load(Ordering::SeqCst))
    }
}
