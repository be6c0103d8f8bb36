//! GPIO interrupt delivery.
//!
//! An [`InterruptController`] owns a small fixed table of registrations.
//! Depending on what the platform offers for a line, a registration is
//! either a bare record, a worker blocked on a hardware interrupt source,
//! or a worker that polls the callback at a fixed interval.

use crate::consts::{IRQ_POLL_INTERVAL, IRQ_WAIT_SLICE, MAX_GPIO_INTERRUPTS};
use crate::error::{Error, Result};
use crate::gpio::GpioLine;
use crate::lock;
use crate::platform::{IrqMechanism, IrqSource, Platform};
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Callback invoked from a worker thread each time a line fires.
pub type IrqCallback = Arc<dyn Fn(GpioLine) + Send + Sync>;

/// Lifecycle of one registration slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Running,
    Stopping,
}

/// Cooperative cancellation flag shared with a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Registration {
    line: GpioLine,
    mechanism: IrqMechanism,
    state: RegistrationState,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
}

type SlotTable = [Option<Registration>; MAX_GPIO_INTERRUPTS];

/// Fixed-capacity GPIO interrupt table for one device.
pub struct InterruptController {
    platform: Arc<dyn Platform>,
    slots: Mutex<SlotTable>,
}

impl InterruptController {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            slots: Mutex::new(Default::default()),
        }
    }

    /// Registers `callback` for `line` and starts delivery.
    ///
    /// Fails with `AlreadyRegistered` if the line is taken and with
    /// `TableFull` when every slot is in use. A failure after the slot was
    /// reserved leaves the slot free again.
    pub fn setup<F>(&self, line: GpioLine, callback: F) -> Result<()>
    where
        F: Fn(GpioLine) + Send + Sync + 'static,
    {
        let callback: IrqCallback = Arc::new(callback);
        let cancel = CancelToken::new();
        let mechanism = self.platform.interrupt_mechanism(line);

        {
            let mut slots = lock(&self.slots);
            if slots.iter().flatten().any(|r| r.line == line) {
                warn!("GPIO {} already has an interrupt registration", line);
                return Err(Error::AlreadyRegistered { line: line.number() });
            }
            let Some(free) = slots.iter_mut().find(|s| s.is_none()) else {
                return Err(Error::TableFull {
                    what: "GPIO interrupt",
                    capacity: MAX_GPIO_INTERRUPTS,
                });
            };
            *free = Some(Registration {
                line,
                mechanism,
                state: RegistrationState::Registering,
                cancel: cancel.clone(),
                worker: None,
            });
        }

        debug!("Setting up GPIO {} interrupt via {:?}", line, mechanism);
        let worker = match self.start_worker(line, mechanism, callback, cancel) {
            Ok(worker) => worker,
            Err(e) => {
                warn!("GPIO {} interrupt setup failed: {}", line, e);
                self.remove(line);
                return Err(e);
            }
        };

        let mut slots = lock(&self.slots);
        if let Some(reg) = slots.iter_mut().flatten().find(|r| r.line == line) {
            reg.worker = worker;
            reg.state = RegistrationState::Running;
        }
        info!("GPIO {} interrupt registered ({:?})", line, mechanism);
        Ok(())
    }

    /// State of the registration for `line`.
    pub fn state(&self, line: GpioLine) -> RegistrationState {
        lock(&self.slots)
            .iter()
            .flatten()
            .find(|r| r.line == line)
            .map_or(RegistrationState::Unregistered, |r| r.state)
    }

    pub fn mechanism(&self, line: GpioLine) -> Option<IrqMechanism> {
        lock(&self.slots)
            .iter()
            .flatten()
            .find(|r| r.line == line)
            .map(|r| r.mechanism)
    }

    /// Number of occupied slots.
    pub fn active_count(&self) -> usize {
        lock(&self.slots).iter().flatten().count()
    }

    /// Stops and unregisters a single line. Returns `false` if it was not
    /// registered.
    pub fn release(&self, line: GpioLine) -> bool {
        let worker = {
            let mut slots = lock(&self.slots);
            let Some(reg) = slots.iter_mut().flatten().find(|r| r.line == line) else {
                return false;
            };
            reg.state = RegistrationState::Stopping;
            reg.cancel.cancel();
            reg.worker.take()
        };
        join_worker(line, worker);
        self.remove(line);
        true
    }

    /// Stops every worker and clears the table.
    ///
    /// Workers notice cancellation at their next wait boundary, so this can
    /// block for up to one wait slice per line.
    pub fn teardown(&self) {
        let workers: Vec<_> = {
            let mut slots = lock(&self.slots);
            slots
                .iter_mut()
                .flatten()
                .map(|reg| {
                    reg.state = RegistrationState::Stopping;
                    reg.cancel.cancel();
                    (reg.line, reg.worker.take())
                })
                .collect()
        };
        if workers.is_empty() {
            return;
        }
        for (line, worker) in workers {
            join_worker(line, worker);
        }
        lock(&self.slots).iter_mut().for_each(|s| *s = None);
        debug!("Interrupt table torn down");
    }

    fn remove(&self, line: GpioLine) {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|r| r.line == line))
        {
            *slot = None;
        }
    }

    fn start_worker(
        &self,
        line: GpioLine,
        mechanism: IrqMechanism,
        callback: IrqCallback,
        cancel: CancelToken,
    ) -> Result<Option<JoinHandle<()>>> {
        let builder = thread::Builder::new().name(format!("gpio{}-irq", line.number()));
        let handle = match mechanism {
            IrqMechanism::None => {
                debug!("GPIO {} has no interrupt capability; recording only", line);
                return Ok(None);
            }
            IrqMechanism::HardwareEdge | IrqMechanism::PowerController => {
                let source = self.platform.acquire_interrupt(line, mechanism)?;
                let platform = self.platform.clone();
                builder.spawn(move || {
                    platform.boost_current_thread();
                    event_loop(line, source, callback, cancel);
                })?
            }
            IrqMechanism::Polling => builder.spawn(move || poll_loop(line, callback, cancel))?,
        };
        Ok(Some(handle))
    }
}

impl Drop for InterruptController {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn join_worker(line: GpioLine, worker: Option<JoinHandle<()>>) {
    if let Some(handle) = worker {
        if handle.join().is_err() {
            warn!("GPIO {} interrupt worker panicked", line);
        }
    }
}

// The source is dropped, and its resource released, when this returns.
fn event_loop(
    line: GpioLine,
    mut source: Box<dyn IrqSource>,
    callback: IrqCallback,
    cancel: CancelToken,
) {
    trace!("GPIO {} event worker started", line);
    while !cancel.is_cancelled() {
        match source.wait(IRQ_WAIT_SLICE) {
            Ok(true) => {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = source.rearm() {
                    warn!("GPIO {} re-arm failed: {}", line, e);
                }
                callback(line);
            }
            Ok(false) => {}
            Err(e) => {
                warn!("GPIO {} interrupt wait failed: {}", line, e);
                thread::sleep(IRQ_POLL_INTERVAL);
            }
        }
    }
    trace!("GPIO {} event worker exiting", line);
}

fn poll_loop(line: GpioLine, callback: IrqCallback, cancel: CancelToken) {
    trace!("GPIO {} poll worker started", line);
    while !cancel.is_cancelled() {
        callback(line);
        thread::sleep(IRQ_POLL_INTERVAL);
    }
    trace!("GPIO {} poll worker exiting", line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::SimPlatform;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_record_only_registration() {
        let sim = Arc::new(SimPlatform::new());
        let irq = InterruptController::new(sim);
        let line = GpioLine::new(4).unwrap();
        irq.setup(line, |_| {}).unwrap();
        assert_eq!(irq.state(line), RegistrationState::Running);
        assert_eq!(irq.mechanism(line), Some(IrqMechanism::None));
        assert!(irq.release(line));
        assert_eq!(irq.state(line), RegistrationState::Unregistered);
        assert!(!irq.release(line));
    }
}
