use crate::domain::models::{CalibrationData, PointerDelta, ScrollDelta};
use crate::domain::settings::SessionConfig;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Center and half-range of the 10-bit raw axis when no calibration is loaded
pub const DEFAULT_CENTER: f64 = 511.5;
pub const DEFAULT_HALF_RANGE: f64 = 511.5;

/// Normalized units to pixels
const SCALE_FACTOR: f64 = 1000.0;

/// Edge joystick: distance from center where drift starts, and its speed
const EDGE_THRESHOLD: f64 = 0.6;
const EDGE_SPEED: f64 = 5.0;

/// Normalized motion per scroll notch
const SCROLL_STEP: f64 = 0.05;

#[derive(Debug, Clone, Copy)]
struct AxisMapping {
    center: f64,
    scale: f64,
}

impl AxisMapping {
    const DEFAULT: Self = Self {
        center: DEFAULT_CENTER,
        scale: DEFAULT_HALF_RANGE,
    };

    fn from_bounds(min: u16, max: u16, center: u16) -> Self {
        Self {
            center: center as f64,
            scale: ((max as f64 - min as f64) / 2.0).max(1.0),
        }
    }

    fn normalize(&self, raw: u16) -> f64 {
        ((raw as f64 - self.center) / self.scale).clamp(-1.0, 1.0)
    }
}

#[derive(Debug, Clone)]
struct PointerTuning {
    sensitivity: f64,
    dead_zone: f64,
    enable_smoothing: bool,
    smoothing_level: usize,
    enable_acceleration: bool,
    curve_power: f64,
    move_threshold: f64,
    edge_joystick: bool,
}

impl From<&SessionConfig> for PointerTuning {
    fn from(config: &SessionConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            dead_zone: config.dead_zone,
            enable_smoothing: config.enable_smoothing,
            smoothing_level: config.smoothing_level,
            enable_acceleration: config.enable_acceleration,
            curve_power: config.curve_power,
            move_threshold: config.move_threshold,
            edge_joystick: config.edge_joystick,
        }
    }
}

/// Maps raw touchpad coordinates to normalized positions and pointer deltas
pub struct TouchpadProcessor {
    calibration: Option<CalibrationData>,
    x_axis: AxisMapping,
    y_axis: AxisMapping,
    tuning: PointerTuning,
    last_processed_pos: Option<(f64, f64)>,
    delta_buffer_x: VecDeque<f64>,
    delta_buffer_y: VecDeque<f64>,
}

impl TouchpadProcessor {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            calibration: None,
            x_axis: AxisMapping::DEFAULT,
            y_axis: AxisMapping::DEFAULT,
            tuning: PointerTuning::from(config),
            last_processed_pos: None,
            delta_buffer_x: VecDeque::new(),
            delta_buffer_y: VecDeque::new(),
        }
    }

    /// Install a calibration. Returns false and falls back to the built-in
    /// range when the calibration is degenerate.
    pub fn set_calibration(&mut self, calibration: Option<CalibrationData>) -> bool {
        match calibration {
            Some(calibration) if calibration.is_valid() => {
                self.x_axis =
                    AxisMapping::from_bounds(calibration.min_x, calibration.max_x, calibration.center_x);
                self.y_axis =
                    AxisMapping::from_bounds(calibration.min_y, calibration.max_y, calibration.center_y);
                debug!(?calibration, "Touchpad calibration applied");
                self.calibration = Some(calibration);
                true
            }
            Some(calibration) => {
                warn!(?calibration, "Rejecting invalid touchpad calibration, using default range");
                self.clear_calibration();
                false
            }
            None => {
                self.clear_calibration();
                true
            }
        }
    }

    fn clear_calibration(&mut self) {
        self.calibration = None;
        self.x_axis = AxisMapping::DEFAULT;
        self.y_axis = AxisMapping::DEFAULT;
    }

    pub fn calibration(&self) -> Option<&CalibrationData> {
        self.calibration.as_ref()
    }

    /// Takes effect on the next processed sample
    pub fn configure(&mut self, config: &SessionConfig) {
        self.tuning = PointerTuning::from(config);
        while self.delta_buffer_x.len() > self.tuning.smoothing_level {
            self.delta_buffer_x.pop_front();
            self.delta_buffer_y.pop_front();
        }
    }

    /// Normalize raw coordinates to [-1, 1]; Y is flipped so up is positive
    pub fn process(&self, raw_x: u16, raw_y: u16) -> (f64, f64) {
        let x = self.x_axis.normalize(raw_x);
        let y = -self.y_axis.normalize(raw_y);
        // -0.0 reads oddly in telemetry
        (x, if y == 0.0 { 0.0 } else { y })
    }

    /// Forget the previous touch sample and the smoothing history
    pub fn reset(&mut self) {
        self.last_processed_pos = None;
        self.delta_buffer_x.clear();
        self.delta_buffer_y.clear();
    }

    /// Cursor movement for a normalized sample, with dead zone, smoothing and
    /// the acceleration curve applied. Screen space: y grows downwards.
    pub fn pointer_delta(&mut self, x: f64, y: f64, touched: bool) -> Option<PointerDelta> {
        if !touched {
            self.reset();
            return None;
        }

        let (mut pixel_dx, mut pixel_dy) = match self.last_processed_pos.replace((x, y)) {
            Some((last_x, last_y)) => self.relative_pixels(x - last_x, last_y - y),
            // First touch frame
            None => (0.0, 0.0),
        };

        if self.tuning.edge_joystick {
            pixel_dx += edge_drift(x) * self.tuning.sensitivity;
            pixel_dy += edge_drift(-y) * self.tuning.sensitivity;
        }

        let threshold = self.tuning.move_threshold;
        if pixel_dx.abs() < threshold && pixel_dy.abs() < threshold {
            return None;
        }

        Some(PointerDelta {
            dx: pixel_dx as i32,
            dy: pixel_dy as i32,
        })
    }

    fn relative_pixels(&mut self, mut dx: f64, mut dy: f64) -> (f64, f64) {
        let tuning = &self.tuning;

        // A step inside the dead zone is noise and is dropped, not carried over
        if (dx * dx + dy * dy).sqrt() <= tuning.dead_zone {
            return (0.0, 0.0);
        }

        if tuning.enable_smoothing {
            self.delta_buffer_x.push_back(dx);
            self.delta_buffer_y.push_back(dy);
            while self.delta_buffer_x.len() > tuning.smoothing_level {
                self.delta_buffer_x.pop_front();
                self.delta_buffer_y.pop_front();
            }
            dx = self.delta_buffer_x.iter().sum::<f64>() / self.delta_buffer_x.len() as f64;
            dy = self.delta_buffer_y.iter().sum::<f64>() / self.delta_buffer_y.len() as f64;
        } else {
            self.delta_buffer_x.clear();
            self.delta_buffer_y.clear();
        }

        if tuning.enable_acceleration {
            let power = tuning.curve_power;
            dx = dx.signum() * dx.abs().powf(power);
            dy = dy.signum() * dy.abs().powf(power);
        }

        (
            dx * tuning.sensitivity * SCALE_FACTOR,
            dy * tuning.sensitivity * SCALE_FACTOR,
        )
    }

    /// Touchpad scroll notches for a normalized sample: one notch per axis
    /// whenever the finger moved further than `SCROLL_STEP` since the last
    /// sample. Shares the touch tracking with `pointer_delta`, so use one or
    /// the other for a given touch.
    pub fn scroll_delta(&mut self, x: f64, y: f64, touched: bool) -> Option<ScrollDelta> {
        if !touched {
            self.reset();
            return None;
        }
        let (last_x, last_y) = self.last_processed_pos.replace((x, y))?;
        let notch = |delta: f64| {
            if delta.abs() > SCROLL_STEP {
                delta.signum() as i32
            } else {
                0
            }
        };
        // Finger up the pad scrolls content up
        let scroll = ScrollDelta {
            vertical: notch(y - last_y),
            horizontal: notch(x - last_x),
        };
        (scroll != ScrollDelta::default()).then_some(scroll)
    }
}

/// Joystick-style drift in pixels per sample once the finger rests past
/// `EDGE_THRESHOLD` on an axis
fn edge_drift(position: f64) -> f64 {
    let excess = position.abs() - EDGE_THRESHOLD;
    if excess > 0.0 {
        position.signum() * excess * EDGE_SPEED
    } else {
        0.0
    }
}
