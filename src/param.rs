//! Sensor parameters and the capability interface behind them.

use crate::error::{Error, Result};
use crate::host::HostBus;
use bitflags::bitflags;

bitflags! {
    /// Optional controls a sensor capability provides.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FeatureCaps: u32 {
        const EXPOSURE = 1 << 0;
        const SATURATION = 1 << 1;
        const HUE = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExposureMode {
    Auto,
    Manual,
}

/// Exposure split into sensor-native terms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExposureValues {
    pub integration_lines: u32,
    pub analog_gain: f32,
    pub digital_gain: f32,
}

/// An exposure request. In `Auto` mode only `target_us` is meaningful and
/// `values` is derived; in `Manual` mode `values` is applied as given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureRequest {
    pub mode: ExposureMode,
    pub target_us: f32,
    pub values: ExposureValues,
}

impl ExposureRequest {
    pub fn auto(target_us: f32) -> Self {
        Self {
            mode: ExposureMode::Auto,
            target_us,
            values: ExposureValues::default(),
        }
    }

    pub fn manual(values: ExposureValues) -> Self {
        Self {
            mode: ExposureMode::Manual,
            target_us: 0.0,
            values,
        }
    }
}

/// A versioned payload the driver stack carries without interpreting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaquePayload {
    pub id: u32,
    pub version: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorParam {
    Exposure(ExposureRequest),
    Saturation(f32),
    Hue(f32),
    Opaque(OpaquePayload),
}

impl SensorParam {
    pub fn kind(&self) -> ParamKind {
        match self {
            SensorParam::Exposure(_) => ParamKind::Exposure,
            SensorParam::Saturation(_) => ParamKind::Saturation,
            SensorParam::Hue(_) => ParamKind::Hue,
            SensorParam::Opaque(p) => ParamKind::Opaque(p.id),
        }
    }
}

/// Parameter selector for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Exposure,
    Saturation,
    Hue,
    Opaque(u32),
}

/// Exposure range of a sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureLimits {
    /// Duration of one line in microseconds.
    pub line_time_us: f32,
    pub max_lines: u32,
    pub min_gain: f32,
    pub max_analog_gain: f32,
    pub max_digital_gain: f32,
}

/// Splits a target exposure time into integration lines and gains.
///
/// Integration time is rounded up to whole lines and clamped to
/// `[1, max_lines]`. Whatever the clamped integration time cannot cover is
/// made up with analog gain first, then digital gain, each clamped to its
/// range.
pub fn split_exposure(target_us: f32, limits: &ExposureLimits) -> ExposureValues {
    let line_time = limits.line_time_us.max(f32::EPSILON);
    let target = target_us.max(0.0);
    let wanted = (target / line_time).ceil();
    let max_lines = limits.max_lines.max(1);
    let lines = (wanted as u32).clamp(1, max_lines);

    let achieved = lines as f32 * line_time;
    let residual = if achieved > 0.0 { target / achieved } else { 1.0 };
    let min_gain = limits.min_gain.max(f32::EPSILON);

    let analog = residual.clamp(min_gain, limits.max_analog_gain.max(min_gain));
    let digital = (residual / analog).clamp(1.0, limits.max_digital_gain.max(1.0));

    ExposureValues {
        integration_lines: lines,
        analog_gain: analog,
        digital_gain: digital,
    }
}

/// Sensor-specific parameter handling used by the generic driver path.
pub trait SensorCapability: Send {
    fn features(&self) -> FeatureCaps;

    fn exposure_limits(&self) -> ExposureLimits;

    /// Applies a resolved parameter. Exposure requests arrive in `Manual`
    /// mode.
    fn set_param(&mut self, host: &HostBus, param: &SensorParam) -> Result<()>;

    fn compute_exposure(&self, target_us: f32) -> ExposureValues {
        split_exposure(target_us, &self.exposure_limits())
    }

    fn get_param(&mut self, _host: &HostBus, kind: ParamKind) -> Result<SensorParam> {
        Err(Error::Unsupported(format!("reading {:?}", kind)))
    }
}
