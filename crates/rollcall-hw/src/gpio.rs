//! Polled digital input through the sysfs GPIO interface.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("gpio {0} unavailable: {1}")]
    Unavailable(u32, String),
    #[error("unexpected gpio value {0:?}")]
    BadValue(String),
    #[error("gpio read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A single boolean-level signal.
pub trait DigitalInput: Send {
    /// Whether the input is at its active level (after polarity).
    fn is_active(&mut self) -> Result<bool, InputError>;
}

impl<T: DigitalInput + ?Sized> DigitalInput for Box<T> {
    fn is_active(&mut self) -> Result<bool, InputError> {
        (**self).is_active()
    }
}

/// A GPIO line read from `/sys/class/gpio/gpioN/value`.
pub struct SysfsInput {
    value_path: PathBuf,
    active_low: bool,
}

impl SysfsInput {
    const SYSFS_ROOT: &'static str = "/sys/class/gpio";

    /// Export `gpio` as an input if needed and open its value file.
    pub fn open(gpio: u32, active_low: bool) -> Result<Self, InputError> {
        let root = Path::new(Self::SYSFS_ROOT);
        let line = root.join(format!("gpio{gpio}"));
        if !line.exists() {
            fs::write(root.join("export"), gpio.to_string())
                .map_err(|e| InputError::Unavailable(gpio, format!("export failed: {e}")))?;
            // udev needs a moment to fix permissions on the new node.
            thread::sleep(Duration::from_millis(100));
        }
        if let Err(e) = fs::write(line.join("direction"), "in") {
            tracing::debug!(gpio, error = %e, "could not set direction; assuming input");
        }
        let input = Self::with_path(line.join("value"), active_low);
        if !input.value_path.exists() {
            return Err(InputError::Unavailable(gpio, "value file missing".into()));
        }
        tracing::info!(gpio, active_low, "opened gpio input");
        Ok(input)
    }

    /// Read an arbitrary value file (tests, non-standard sysfs layouts).
    pub fn with_path(value_path: impl Into<PathBuf>, active_low: bool) -> Self {
        Self {
            value_path: value_path.into(),
            active_low,
        }
    }
}

impl DigitalInput for SysfsInput {
    fn is_active(&mut self) -> Result<bool, InputError> {
        let raw = fs::read_to_string(&self.value_path)?;
        let high = match raw.trim() {
            "0" => false,
            "1" => true,
            other => return Err(InputError::BadValue(other.to_string())),
        };
        Ok(high != self.active_low)
    }
}
