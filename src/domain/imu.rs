//! Motion processing for air mouse mode.
//!
//! Works on the scaled gyroscope and accelerometer values produced by the
//! packet decoder (rad/s and m/s², both multiplied by 10 000).

use crate::domain::models::{PointerDelta, Vector3};
use crate::domain::settings::SessionConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Decoded gyro units per rad/s
pub const GYRO_UNITS_PER_RAD_S: f64 = 10_000.0;
/// Decoded accelerometer units per g
pub const ACCEL_UNITS_PER_G: f64 = 10_000.0 * 9.80665;

/// Samples averaged into the drift offset; the controller must lie still
pub const CALIBRATION_SAMPLES: usize = 50;

const SMOOTHING_WINDOW: usize = 3;
/// Rates below this are sensor noise (rad/s)
const DEAD_ZONE: f64 = 0.05;
/// Pixels per sample for 1 rad/s at sensitivity 1
const AIR_MOUSE_SCALE: f64 = 20.0;

/// Gravity share on the Y axis that counts as tilted
const TILT_THRESHOLD: f64 = 0.3;
const TILT_SCROLL_INTERVAL: Duration = Duration::from_millis(100);

/// Acceleration magnitude (g) well above gravity
const SHAKE_THRESHOLD: f64 = 2.5;

pub struct ImuProcessor {
    sensitivity: f64,

    // Drift compensation
    offset: Vector3,
    calibration: Option<Vec<Vector3>>,

    gyro_buffer_x: VecDeque<f64>,
    gyro_buffer_y: VecDeque<f64>,

    // Net pointer travel since the last re-center
    travel_x: i64,
    travel_y: i64,

    shaking: bool,
    last_tilt_scroll: Option<Instant>,
}

impl ImuProcessor {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            offset: Vector3::default(),
            calibration: None,
            gyro_buffer_x: VecDeque::with_capacity(SMOOTHING_WINDOW),
            gyro_buffer_y: VecDeque::with_capacity(SMOOTHING_WINDOW),
            travel_x: 0,
            travel_y: 0,
            shaking: false,
            last_tilt_scroll: None,
        }
    }

    pub fn configure(&mut self, config: &SessionConfig) {
        self.sensitivity = config.sensitivity;
    }

    /// Collect the next `CALIBRATION_SAMPLES` gyro readings as the resting
    /// offset
    pub fn start_calibration(&mut self) {
        self.calibration = Some(Vec::with_capacity(CALIBRATION_SAMPLES));
        info!("Gyro calibration started - keep controller still");
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    /// 0.0 to 1.0 while calibrating
    pub fn calibration_progress(&self) -> f64 {
        self.calibration
            .as_ref()
            .map(|samples| samples.len() as f64 / CALIBRATION_SAMPLES as f64)
            .unwrap_or(0.0)
    }

    pub fn offset(&self) -> Vector3 {
        self.offset
    }

    /// Record one reading while calibrating. Returns the new offset once
    /// enough samples are in.
    pub fn calibrate(&mut self, gyro: &Vector3) -> Option<Vector3> {
        let samples = self.calibration.as_mut()?;
        samples.push(*gyro);
        if samples.len() < CALIBRATION_SAMPLES {
            return None;
        }

        let count = samples.len() as f64;
        let sum = samples.iter().fold(Vector3::default(), |sum, sample| Vector3 {
            x: sum.x + sample.x,
            y: sum.y + sample.y,
            z: sum.z + sample.z,
        });
        self.offset = Vector3 {
            x: sum.x / count,
            y: sum.y / count,
            z: sum.z / count,
        };
        self.calibration = None;
        self.gyro_buffer_x.clear();
        self.gyro_buffer_y.clear();
        info!(
            "Gyro calibration complete. Offsets: ({:.4}, {:.4}, {:.4})",
            self.offset.x, self.offset.y, self.offset.z
        );
        Some(self.offset)
    }

    /// Cursor movement from angular rate. Gyro X drives the horizontal axis,
    /// gyro Y the vertical one.
    pub fn air_mouse_delta(&mut self, gyro: &Vector3) -> Option<PointerDelta> {
        if self.is_calibrating() {
            return None;
        }

        let rate_x = (gyro.x - self.offset.x) / GYRO_UNITS_PER_RAD_S;
        let rate_y = (gyro.y - self.offset.y) / GYRO_UNITS_PER_RAD_S;
        let smoothed_x = push_average(&mut self.gyro_buffer_x, rate_x);
        let smoothed_y = push_average(&mut self.gyro_buffer_y, rate_y);

        let dx = if smoothed_x.abs() > DEAD_ZONE { smoothed_x } else { 0.0 };
        let dy = if smoothed_y.abs() > DEAD_ZONE { smoothed_y } else { 0.0 };

        let scale = AIR_MOUSE_SCALE * self.sensitivity;
        let delta = PointerDelta {
            dx: (dx * scale) as i32,
            dy: (dy * scale) as i32,
        };
        if delta.dx == 0 && delta.dy == 0 {
            return None;
        }
        self.travel_x += delta.dx as i64;
        self.travel_y += delta.dy as i64;
        Some(delta)
    }

    /// One wheel notch per interval while the controller is tilted forward
    /// (positive) or backward (negative)
    pub fn tilt_scroll(&mut self, accel: &Vector3, now: Instant) -> Option<i32> {
        let tilt = accel.y / ACCEL_UNITS_PER_G;
        let notch = if tilt > TILT_THRESHOLD {
            1
        } else if tilt < -TILT_THRESHOLD {
            -1
        } else {
            self.last_tilt_scroll = None;
            return None;
        };

        match self.last_tilt_scroll {
            Some(last) if now.saturating_duration_since(last) < TILT_SCROLL_INTERVAL => None,
            _ => {
                self.last_tilt_scroll = Some(now);
                Some(notch)
            }
        }
    }

    /// True once per shake, when the acceleration first exceeds the threshold
    pub fn detect_shake(&mut self, accel: &Vector3) -> bool {
        let magnitude =
            (accel.x * accel.x + accel.y * accel.y + accel.z * accel.z).sqrt() / ACCEL_UNITS_PER_G;
        let shaking = magnitude > SHAKE_THRESHOLD;
        let started = shaking && !self.shaking;
        self.shaking = shaking;
        if started {
            debug!(magnitude, "Shake detected");
        }
        started
    }

    /// Pointer travel accumulated since the last re-center
    pub fn travel(&self) -> (i64, i64) {
        (self.travel_x, self.travel_y)
    }

    /// Re-center: forget accumulated travel and rate history
    pub fn reset_orientation(&mut self) {
        self.travel_x = 0;
        self.travel_y = 0;
        self.gyro_buffer_x.clear();
        self.gyro_buffer_y.clear();
        info!("IMU orientation reset");
    }

    /// Drop transient motion state; the drift offset survives
    pub fn reset(&mut self) {
        self.gyro_buffer_x.clear();
        self.gyro_buffer_y.clear();
        self.shaking = false;
        self.last_tilt_scroll = None;
    }
}

fn push_average(buffer: &mut VecDeque<f64>, value: f64) -> f64 {
    buffer.push_back(value);
    while buffer.len() > SMOOTHING_WINDOW {
        buffer.pop_front();
    }
    buffer.iter().sum::<f64>() / buffer.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gyro(x: f64, y: f64) -> Vector3 {
        Vector3 {
            x: x * GYRO_UNITS_PER_RAD_S,
            y: y * GYRO_UNITS_PER_RAD_S,
            z: 0.0,
        }
    }

    fn accel(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3 {
            x: x * ACCEL_UNITS_PER_G,
            y: y * ACCEL_UNITS_PER_G,
            z: z * ACCEL_UNITS_PER_G,
        }
    }

    #[test]
    fn test_rotation_moves_pointer() {
        let mut imu = ImuProcessor::new(&SessionConfig::default());
        // 1 rad/s * 20 * sensitivity 2
        assert_eq!(
            imu.air_mouse_delta(&gyro(1.0, 0.0)),
            Some(PointerDelta { dx: 40, dy: 0 })
        );
        // Averaged with the previous sample
        assert_eq!(
            imu.air_mouse_delta(&gyro(0.0, -1.0)),
            Some(PointerDelta { dx: 20, dy: -20 })
        );
        assert_eq!(imu.travel(), (60, -20));
    }

    #[test]
    fn test_noise_inside_dead_zone_is_ignored() {
        let mut imu = ImuProcessor::new(&SessionConfig::default());
        for _ in 0..10 {
            assert_eq!(imu.air_mouse_delta(&gyro(0.03, -0.03)), None);
        }
    }

    #[test]
    fn test_calibration_removes_drift() {
        let mut imu = ImuProcessor::new(&SessionConfig::default());
        assert_eq!(imu.calibrate(&gyro(0.5, 0.0)), None);
        assert!(!imu.is_calibrating());

        imu.start_calibration();
        for _ in 1..CALIBRATION_SAMPLES {
            assert_eq!(imu.calibrate(&gyro(0.5, 0.25)), None);
            assert_eq!(imu.air_mouse_delta(&gyro(0.5, 0.25)), None);
        }
        assert!((imu.calibration_progress() - 0.98).abs() < 1e-9);
        let offset = imu.calibrate(&gyro(0.5, 0.25)).expect("calibration complete");
        assert_eq!(offset, gyro(0.5, 0.25));
        assert!(!imu.is_calibrating());

        // The resting rate now reads as still
        assert_eq!(imu.air_mouse_delta(&gyro(0.5, 0.25)), None);
    }

    #[test]
    fn test_tilt_scroll_is_rate_limited() {
        let mut imu = ImuProcessor::new(&SessionConfig::default());
        let t0 = Instant::now();
        let forward = accel(0.0, 0.5, 0.8);
        assert_eq!(imu.tilt_scroll(&forward, t0), Some(1));
        assert_eq!(imu.tilt_scroll(&forward, t0 + Duration::from_millis(50)), None);
        assert_eq!(imu.tilt_scroll(&forward, t0 + Duration::from_millis(100)), Some(1));

        assert_eq!(imu.tilt_scroll(&accel(0.0, 0.1, 1.0), t0 + Duration::from_millis(120)), None);
        assert_eq!(
            imu.tilt_scroll(&accel(0.0, -0.5, 0.8), t0 + Duration::from_millis(130)),
            Some(-1)
        );
    }

    #[test]
    fn test_shake_fires_once_per_shake() {
        let mut imu = ImuProcessor::new(&SessionConfig::default());
        assert!(!imu.detect_shake(&accel(0.0, 0.0, 1.0)));
        assert!(imu.detect_shake(&accel(3.0, 0.0, 1.0)));
        assert!(!imu.detect_shake(&accel(3.0, 0.0, 1.0)));
        assert!(!imu.detect_shake(&accel(0.0, 0.0, 1.0)));
        assert!(imu.detect_shake(&accel(0.0, -2.0, 2.0)));
    }

    #[test]
    fn test_reset_orientation_clears_travel() {
        let mut imu = ImuProcessor::new(&SessionConfig::default());
        imu.air_mouse_delta(&gyro(1.0, 1.0));
        assert_ne!(imu.travel(), (0, 0));
        imu.reset_orientation();
        assert_eq!(imu.travel(), (0, 0));
    }
}
