//! Power sequencing against the simulated host clock.

mod common;

use common::init_logging;
use gmsl_sensor_hal::{
    ClockLine, Error, GpioLevel, GpioLine, Platform, PowerAction, PowerSequencer, PowerSetting,
    SimEvent, SimPlatform,
};
use std::sync::Arc;
use std::time::Duration;

fn sequencer(sim: &Arc<SimPlatform>, verify: bool) -> PowerSequencer {
    let platform: Arc<dyn Platform> = sim.clone();
    PowerSequencer::new(platform).with_verify(verify)
}

fn reset() -> GpioLine {
    GpioLine::new(7).unwrap()
}

#[test]
fn test_steps_run_in_order_with_settle_times() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    let setting = PowerSetting::default()
        .gpio(reset(), GpioLevel::Low, 10)
        .unwrap()
        .gpio(reset(), GpioLevel::High, 2_000)
        .unwrap();

    sequencer(&sim, false).execute(&setting).unwrap();

    let gpio: Vec<_> = sim
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SimEvent::Gpio { level, at, .. } => Some((level, at)),
            _ => None,
        })
        .collect();
    assert_eq!(
        gpio,
        vec![
            (GpioLevel::Low, Duration::ZERO),
            (GpioLevel::High, Duration::from_millis(10)),
        ]
    );
    assert!(sim.now() >= Duration::from_millis(2_010));
}

#[test]
fn test_clock_step_reaches_platform() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    let setting = PowerSetting::default()
        .clock(ClockLine(1), 24_000_000, 1)
        .unwrap();

    sequencer(&sim, false).execute(&setting).unwrap();

    assert_eq!(
        sim.events(),
        vec![
            SimEvent::Clock { clock: ClockLine(1), rate_hz: 24_000_000, at: Duration::ZERO },
            SimEvent::Delay(Duration::from_millis(1)),
        ]
    );
}

#[test]
fn test_failed_step_still_waits() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    sim.fail_gpio(reset());
    let mut setting = PowerSetting::default();
    setting
        .push(PowerAction::Gpio { line: reset(), level: GpioLevel::High }, 50)
        .unwrap();
    setting.push(PowerAction::Other { tag: 3 }, 5).unwrap();

    let err = sequencer(&sim, false).execute(&setting).unwrap_err();
    assert!(matches!(err, Error::SequenceFailed { failed: 1, total: 2 }));
    assert_eq!(sim.now(), Duration::from_millis(55));
}

#[test]
fn test_verify_detects_stuck_line() {
    init_logging();
    let sim = Arc::new(SimPlatform::new());
    sim.stick_gpio(reset());
    let setting = PowerSetting::default()
        .gpio(reset(), GpioLevel::High, 0)
        .unwrap();

    assert!(sequencer(&sim, false).execute(&setting).is_ok());
    assert!(sequencer(&sim, true).execute(&setting).is_err());
}
