//! Power sequencing: ordered clock/GPIO actions with settle delays.

use crate::consts::POWER_SETTING_MAX_STEPS;
use crate::error::{Error, Result};
use crate::gpio::{GpioLevel, GpioLine};
use crate::platform::{ClockLine, Platform};
use log::{debug, trace, warn};
use std::sync::Arc;
use std::time::Duration;

/// What one power step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    /// Enable a clock output.
    Clock { line: ClockLine, rate_hz: u32 },
    /// Drive a GPIO line.
    Gpio { line: GpioLine, level: GpioLevel },
    /// Handled by out-of-band platform configuration; the tag is only logged.
    Other { tag: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerStep {
    pub action: PowerAction,
    pub delay: Duration,
}

/// An ordered, bounded list of power steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PowerSetting {
    steps: Vec<PowerStep>,
}

impl PowerSetting {
    pub fn new(steps: Vec<PowerStep>) -> Result<Self> {
        if steps.len() > POWER_SETTING_MAX_STEPS {
            return Err(Error::OperationTooLarge {
                max: POWER_SETTING_MAX_STEPS,
                actual: steps.len(),
            });
        }
        Ok(Self { steps })
    }

    /// Appends a step.
    pub fn push(&mut self, action: PowerAction, delay_ms: u64) -> Result<()> {
        if self.steps.len() >= POWER_SETTING_MAX_STEPS {
            return Err(Error::OperationTooLarge {
                max: POWER_SETTING_MAX_STEPS,
                actual: self.steps.len() + 1,
            });
        }
        self.steps.push(PowerStep {
            action,
            delay: Duration::from_millis(delay_ms),
        });
        Ok(())
    }

    /// Builder-style [`push`](Self::push) for a GPIO step.
    pub fn gpio(mut self, line: GpioLine, level: GpioLevel, delay_ms: u64) -> Result<Self> {
        self.push(PowerAction::Gpio { line, level }, delay_ms)?;
        Ok(self)
    }

    /// Builder-style [`push`](Self::push) for a clock step.
    pub fn clock(mut self, line: ClockLine, rate_hz: u32, delay_ms: u64) -> Result<Self> {
        self.push(PowerAction::Clock { line, rate_hz }, delay_ms)?;
        Ok(self)
    }

    pub fn steps(&self) -> &[PowerStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Executes [`PowerSetting`]s against a platform.
pub struct PowerSequencer {
    platform: Arc<dyn Platform>,
    verify: bool,
}

impl PowerSequencer {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            verify: false,
        }
    }

    /// Read each GPIO back after driving it; a mismatch counts as a failed step.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Runs every step in order.
    ///
    /// There is no rollback: a failing step is logged and the rest of the
    /// sequence, including every delay, still runs. Fails afterwards with
    /// `SequenceFailed` if any clock or GPIO step could not be confirmed.
    pub fn execute(&self, setting: &PowerSetting) -> Result<()> {
        debug!("Executing power sequence of {} step(s)", setting.len());
        let mut failed = 0usize;
        for (idx, step) in setting.steps().iter().enumerate() {
            if let Err(e) = self.run_step(&step.action) {
                warn!("Power step {} ({:?}) failed: {}", idx, step.action, e);
                failed += 1;
            }
            if !step.delay.is_zero() {
                trace!("Power step {} settle {:?}", idx, step.delay);
                self.platform.delay(step.delay);
            }
        }
        if failed > 0 {
            return Err(Error::SequenceFailed {
                failed,
                total: setting.len(),
            });
        }
        Ok(())
    }

    fn run_step(&self, action: &PowerAction) -> Result<()> {
        match *action {
            PowerAction::Clock { line, rate_hz } => {
                trace!("Enabling {} at {} Hz", line, rate_hz);
                self.platform.clock_enable(line, rate_hz)
            }
            PowerAction::Gpio { line, level } => {
                trace!("Driving GPIO {} {:?}", line, level);
                self.platform.gpio_write(line, level)?;
                if self.verify {
                    let actual = self.platform.gpio_read(line)?;
                    if actual != level {
                        return Err(Error::Failed(format!(
                            "GPIO {} reads {:?} after driving {:?}",
                            line, actual, level
                        )));
                    }
                }
                Ok(())
            }
            PowerAction::Other { tag } => {
                trace!("Power action tag {} handled by platform configuration", tag);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_setting_bound() {
        let line = GpioLine::new(0).unwrap();
        let mut setting = PowerSetting::default();
        for _ in 0..POWER_SETTING_MAX_STEPS {
            setting.push(PowerAction::Gpio { line, level: GpioLevel::High }, 0).unwrap();
        }
        assert!(setting.push(PowerAction::Other { tag: 1 }, 0).is_err());
        let steps = vec![setting.steps()[0]; POWER_SETTING_MAX_STEPS + 1];
        assert!(PowerSetting::new(steps).is_err());
    }
}
