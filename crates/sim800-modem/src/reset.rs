//! Hardware reset line.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::TransportError;

/// Drives the modem's reset input.
pub trait HardwareReset: Send {
    /// Hold the reset line active on `pin` for `duration`.
    fn pulse(&mut self, pin: u32, duration: Duration) -> Result<(), TransportError>;
}

/// Reset through the Linux sysfs GPIO interface.
///
/// The pin is toggled twice: the board wiring needs a low, high, low, high
/// sequence before the module restarts cleanly.
#[derive(Debug, Clone)]
pub struct SysfsGpioReset {
    root: PathBuf,
}

impl SysfsGpioReset {
    /// Use the standard `/sys/class/gpio` tree.
    pub fn new() -> Self {
        Self::with_root("/sys/class/gpio")
    }

    /// Use a different GPIO tree.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        SysfsGpioReset { root: root.into() }
    }

    fn export(&self, pin: u32) -> io::Result<()> {
        if self.root.join(format!("gpio{}", pin)).exists() {
            return Ok(());
        }
        fs::write(self.root.join("export"), pin.to_string())
    }

    fn set(&self, pin: u32, high: bool) -> io::Result<()> {
        let value = if high { "1" } else { "0" };
        fs::write(self.root.join(format!("gpio{}/value", pin)), value)
    }

    fn run(&self, pin: u32, duration: Duration) -> io::Result<()> {
        self.export(pin)?;
        fs::write(self.root.join(format!("gpio{}/direction", pin)), "out")?;
        for level in [false, true, false, true] {
            self.set(pin, level)?;
            thread::sleep(duration);
        }
        Ok(())
    }
}

impl Default for SysfsGpioReset {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareReset for SysfsGpioReset {
    fn pulse(&mut self, pin: u32, duration: Duration) -> Result<(), TransportError> {
        debug!(pin, ?duration, "pulsing reset line");
        self.run(pin, duration)
            .map_err(|source| TransportError::Gpio { pin, source })
    }
}

/// No reset line is wired; boot falls back to a soft reboot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReset;

impl HardwareReset for NoReset {
    fn pulse(&mut self, pin: u32, _duration: Duration) -> Result<(), TransportError> {
        debug!(pin, "no reset line available");
        Ok(())
    }
}
