//! Interrupt registration and worker lifecycle.

mod common;

use common::init_logging;
use gmsl_sensor_hal::{
    ErrorKind, GpioLine, InterruptController, IrqMechanism, RegistrationState, SimPlatform,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn line(n: u8) -> GpioLine {
    GpioLine::new(n).unwrap()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_duplicate_line_is_rejected() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    sim.set_interrupt_mechanism(line(2), IrqMechanism::Polling);
    let irq = InterruptController::new(sim.clone());

    irq.setup(line(2), |_| {}).unwrap();
    let err = irq.setup(line(2), |_| {}).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Failed);
    assert_eq!(irq.active_count(), 1);
    assert_eq!(irq.state(line(2)), RegistrationState::Running);
}

#[test]
fn test_table_holds_three_lines() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    let irq = InterruptController::new(sim);
    for n in 0..3 {
        irq.setup(line(n), |_| {}).unwrap();
    }

    let err = irq.setup(line(3), |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoMemory);

    assert!(irq.release(line(1)));
    irq.setup(line(3), |_| {}).unwrap();
    assert_eq!(irq.active_count(), 3);
}

#[test]
fn test_polling_worker_invokes_callback() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    sim.set_interrupt_mechanism(line(6), IrqMechanism::Polling);
    let irq = InterruptController::new(sim);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    irq.setup(line(6), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 3));
    irq.teardown();
    let settled = calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), settled);
    assert_eq!(irq.active_count(), 0);
}

#[test]
fn test_edge_worker_delivers_each_event() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    sim.set_interrupt_mechanism(line(9), IrqMechanism::HardwareEdge);
    let irq = InterruptController::new(sim.clone());
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    irq.setup(line(9), move |l| {
        let _ = tx.lock().unwrap().send(l);
    })
    .unwrap();
    assert!(sim.interrupt_acquired(line(9)));
    assert_eq!(irq.mechanism(line(9)), Some(IrqMechanism::HardwareEdge));

    sim.fire_interrupt(line(9));
    sim.fire_interrupt(line(9));
    for _ in 0..2 {
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), line(9));
    }
    assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

    assert!(irq.release(line(9)));
    assert!(!sim.interrupt_acquired(line(9)));
}

#[test]
fn test_acquire_failure_frees_the_slot() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    sim.set_interrupt_mechanism(line(1), IrqMechanism::PowerController);
    sim.fail_interrupt_acquire(line(1));
    let irq = InterruptController::new(sim.clone());

    assert!(irq.setup(line(1), |_| {}).is_err());
    assert_eq!(irq.state(line(1)), RegistrationState::Unregistered);
    assert_eq!(irq.active_count(), 0);
}

#[test]
fn test_drop_releases_interrupt_sources() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    sim.set_interrupt_mechanism(line(4), IrqMechanism::HardwareEdge);
    sim.set_interrupt_mechanism(line(5), IrqMechanism::HardwareEdge);
    {
        let irq = InterruptController::new(sim.clone());
        irq.setup(line(4), |_| {}).unwrap();
        irq.setup(line(5), |_| {}).unwrap();
        assert!(sim.interrupt_acquired(line(4)));
    }
    assert!(!sim.interrupt_acquired(line(4)));
    assert!(!sim.interrupt_acquired(line(5)));
}
