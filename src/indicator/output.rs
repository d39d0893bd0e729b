//! Indicator output lines

use std::fs;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::{Arc, Mutex, PoisonError};
#[cfg(test)]
use std::thread::{self, ThreadId};

use tracing::debug;

use super::animator::IndicatorError;

/// One physical indicator output
pub trait IndicatorOutput: Send + 'static {
    /// Drive the output; `0.0` is off and `1.0` is full level.
    ///
    /// Binary outputs treat any positive level as on.
    fn set_level(&mut self, level: f32) -> Result<(), IndicatorError>;

    /// Whether intermediate levels are rendered
    fn supports_levels(&self) -> bool {
        false
    }
}

fn write_attr(path: &Path, value: &str) -> Result<(), IndicatorError> {
    fs::write(path, value).map_err(|source| IndicatorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// On/off GPIO output through sysfs
#[derive(Debug)]
pub struct SysfsGpioOutput {
    value_path: PathBuf,
}

impl SysfsGpioOutput {
    /// Export the line if needed, configure it as an output and drive it low
    pub fn open(gpio_root: &Path, number: u32) -> Result<Self, IndicatorError> {
        let line_dir = gpio_root.join(format!("gpio{}", number));
        if !line_dir.exists() {
            debug!(line = number, "exporting gpio output");
            write_attr(&gpio_root.join("export"), &number.to_string())?;
        }
        write_attr(&line_dir.join("direction"), "out")?;

        let mut output = Self {
            value_path: line_dir.join("value"),
        };
        output.set_level(0.0)?;
        Ok(output)
    }
}

impl IndicatorOutput for SysfsGpioOutput {
    fn set_level(&mut self, level: f32) -> Result<(), IndicatorError> {
        write_attr(&self.value_path, if level > 0.0 { "1" } else { "0" })
    }
}

/// Dimmable output backed by a sysfs PWM channel
#[derive(Debug)]
pub struct SysfsPwmOutput {
    duty_path: PathBuf,
    period_ns: u64,
}

impl SysfsPwmOutput {
    /// Export and enable `pwmchip<chip>/pwm<channel>` at zero duty
    pub fn open(
        pwm_root: &Path,
        chip: u32,
        channel: u32,
        period_ns: u64,
    ) -> Result<Self, IndicatorError> {
        let chip_dir = pwm_root.join(format!("pwmchip{}", chip));
        let channel_dir = chip_dir.join(format!("pwm{}", channel));
        if !channel_dir.exists() {
            debug!(chip, channel, "exporting pwm channel");
            write_attr(&chip_dir.join("export"), &channel.to_string())?;
        }

        let duty_path = channel_dir.join("duty_cycle");
        write_attr(&duty_path, "0")?;
        write_attr(&channel_dir.join("period"), &period_ns.to_string())?;
        write_attr(&channel_dir.join("enable"), "1")?;

        Ok(Self {
            duty_path,
            period_ns,
        })
    }
}

impl IndicatorOutput for SysfsPwmOutput {
    fn set_level(&mut self, level: f32) -> Result<(), IndicatorError> {
        let duty = (self.period_ns as f64 * f64::from(level.clamp(0.0, 1.0))).round() as u64;
        write_attr(&self.duty_path, &duty.to_string())
    }

    fn supports_levels(&self) -> bool {
        true
    }
}

/// Output that records every level it is driven to
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordingOutput {
    writes: Arc<Mutex<Vec<(ThreadId, f32)>>>,
    dimmable: bool,
    failing: bool,
}

#[cfg(test)]
impl RecordingOutput {
    pub fn binary() -> Self {
        Self {
            writes: Arc::default(),
            dimmable: false,
            failing: false,
        }
    }

    pub fn dimmable() -> Self {
        Self {
            dimmable: true,
            ..Self::binary()
        }
    }

    /// Records levels but reports every write as failed
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::binary()
        }
    }

    pub fn history(&self) -> Vec<f32> {
        self.writes().into_iter().map(|(_, level)| level).collect()
    }

    /// Thread that performed each write, in order
    pub fn writers(&self) -> Vec<ThreadId> {
        self.writes().into_iter().map(|(writer, _)| writer).collect()
    }

    fn writes(&self) -> Vec<(ThreadId, f32)> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current(&self) -> Option<f32> {
        self.history().last().copied()
    }
}

#[cfg(test)]
impl IndicatorOutput for RecordingOutput {
    fn set_level(&mut self, level: f32) -> Result<(), IndicatorError> {
        let level = if self.dimmable {
            level
        } else if level > 0.0 {
            1.0
        } else {
            0.0
        };
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((thread::current().id(), level));
        if self.failing {
            return Err(IndicatorError::Io {
                path: PathBuf::from("/dev/null/indicator"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated fault"),
            });
        }
        Ok(())
    }

    fn supports_levels(&self) -> bool {
        self.dimmable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpio_output_writes_value() {
        let root = tempfile::tempdir().unwrap();
        let line_dir = root.path().join("gpio23");
        fs::create_dir_all(&line_dir).unwrap();

        let mut output = SysfsGpioOutput::open(root.path(), 23).unwrap();
        assert_eq!(fs::read_to_string(line_dir.join("direction")).unwrap(), "out");
        assert_eq!(fs::read_to_string(line_dir.join("value")).unwrap(), "0");

        output.set_level(0.4).unwrap();
        assert_eq!(fs::read_to_string(line_dir.join("value")).unwrap(), "1");
        assert!(!output.supports_levels());
    }

    #[test]
    fn test_pwm_output_scales_duty() {
        let root = tempfile::tempdir().unwrap();
        let channel_dir = root.path().join("pwmchip0").join("pwm1");
        fs::create_dir_all(&channel_dir).unwrap();

        let mut output = SysfsPwmOutput::open(root.path(), 0, 1, 1000).unwrap();
        assert_eq!(fs::read_to_string(channel_dir.join("enable")).unwrap(), "1");

        output.set_level(0.25).unwrap();
        assert_eq!(fs::read_to_string(channel_dir.join("duty_cycle")).unwrap(), "250");
        output.set_level(2.0).unwrap();
        assert_eq!(fs::read_to_string(channel_dir.join("duty_cycle")).unwrap(), "1000");
        assert!(output.supports_levels());
    }
}
