//! Touchpad calibration recording.
//!
//! The user sweeps a finger over the whole pad; every touched sample widens
//! the observed bounds and every stroke is filed under the direction it
//! mostly moved in.

use crate::domain::models::{CalibrationData, DirectionalSample};
use tracing::info;

/// Fewer touched samples than this cannot describe the pad
pub const MIN_SAMPLES: usize = 20;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("calibration is not recording")]
    NotRecording,
    #[error("only {0} touch samples recorded, sweep the whole touchpad")]
    TooFewSamples(usize),
    #[error("recorded bounds are degenerate ({min_x}..{max_x} x {min_y}..{max_y})")]
    Degenerate {
        min_x: u16,
        max_x: u16,
        min_y: u16,
        max_y: u16,
    },
}

#[derive(Debug, Default)]
pub struct CalibrationRecorder {
    recording: bool,
    samples: usize,
    min_x: u16,
    max_x: u16,
    min_y: u16,
    max_y: u16,
    up: DirectionalSample,
    down: DirectionalSample,
    left: DirectionalSample,
    right: DirectionalSample,
    stroke_start: Option<(u16, u16)>,
    last: Option<(u16, u16)>,
}

impl CalibrationRecorder {
    pub fn start(&mut self) {
        *self = Self {
            recording: true,
            min_x: u16::MAX,
            min_y: u16::MAX,
            ..Default::default()
        };
        info!("Touchpad calibration started");
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn record(&mut self, raw_x: u16, raw_y: u16, touched: bool) {
        if !self.recording {
            return;
        }
        if !touched {
            self.close_stroke();
            return;
        }

        self.samples += 1;
        self.min_x = self.min_x.min(raw_x);
        self.max_x = self.max_x.max(raw_x);
        self.min_y = self.min_y.min(raw_y);
        self.max_y = self.max_y.max(raw_y);
        if self.stroke_start.is_none() {
            self.stroke_start = Some((raw_x, raw_y));
        }
        self.last = Some((raw_x, raw_y));
    }

    fn close_stroke(&mut self) {
        let (Some((x0, y0)), Some((x1, y1))) = (self.stroke_start.take(), self.last.take()) else {
            return;
        };
        let dx = x1 as f64 - x0 as f64;
        let dy = y1 as f64 - y0 as f64;
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        // Raw y grows towards the bottom of the pad
        let bucket = if dx.abs() >= dy.abs() {
            if dx > 0.0 {
                &mut self.right
            } else {
                &mut self.left
            }
        } else if dy > 0.0 {
            &mut self.down
        } else {
            &mut self.up
        };
        bucket.add(dx, dy);
    }

    pub fn cancel(&mut self) {
        *self = Self::default();
    }

    /// Stop recording and produce a calibration
    pub fn finish(&mut self) -> Result<CalibrationData, CalibrationError> {
        if !self.recording {
            return Err(CalibrationError::NotRecording);
        }
        self.close_stroke();
        let recorder = std::mem::take(self);

        if recorder.samples < MIN_SAMPLES {
            return Err(CalibrationError::TooFewSamples(recorder.samples));
        }

        let mut calibration =
            CalibrationData::from_bounds(recorder.min_x, recorder.max_x, recorder.min_y, recorder.max_y);
        if !calibration.is_valid() {
            return Err(CalibrationError::Degenerate {
                min_x: recorder.min_x,
                max_x: recorder.max_x,
                min_y: recorder.min_y,
                max_y: recorder.max_y,
            });
        }
        calibration.up = recorder.up;
        calibration.down = recorder.down;
        calibration.left = recorder.left;
        calibration.right = recorder.right;

        info!(
            samples = recorder.samples,
            "Calibration complete: [{}, {}] x [{}, {}]",
            calibration.min_x,
            calibration.max_x,
            calibration.min_y,
            calibration.max_y
        );
        Ok(calibration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke(recorder: &mut CalibrationRecorder, from: (u16, u16), to: (u16, u16), steps: u16) {
        for i in 0..=steps {
            let x = from.0 as i32 + (to.0 as i32 - from.0 as i32) * i as i32 / steps as i32;
            let y = from.1 as i32 + (to.1 as i32 - from.1 as i32) * i as i32 / steps as i32;
            recorder.record(x as u16, y as u16, true);
        }
        recorder.record(0, 0, false);
    }

    #[test]
    fn test_sweep_produces_bounds_and_directions() {
        let mut recorder = CalibrationRecorder::default();
        recorder.start();
        stroke(&mut recorder, (100, 500), (900, 500), 10);
        stroke(&mut recorder, (500, 80), (500, 950), 10);
        stroke(&mut recorder, (500, 950), (500, 80), 10);

        let calibration = recorder.finish().unwrap();
        assert_eq!((calibration.min_x, calibration.max_x), (100, 900));
        assert_eq!((calibration.min_y, calibration.max_y), (80, 950));
        assert_eq!(calibration.center_x, 500);
        assert_eq!(calibration.right.count, 1);
        assert_eq!(calibration.down.count, 1);
        assert_eq!(calibration.up.count, 1);
        assert_eq!(calibration.left.count, 0);
        assert!(calibration.up.avg_dy < 0.0);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_release_samples_do_not_widen_bounds() {
        let mut recorder = CalibrationRecorder::default();
        recorder.start();
        stroke(&mut recorder, (200, 200), (800, 800), 30);
        let calibration = recorder.finish().unwrap();
        assert_eq!(calibration.min_x, 200);
    }

    #[test]
    fn test_too_few_samples() {
        let mut recorder = CalibrationRecorder::default();
        recorder.start();
        stroke(&mut recorder, (100, 100), (900, 900), 3);
        assert_eq!(recorder.finish(), Err(CalibrationError::TooFewSamples(4)));
    }

    #[test]
    fn test_degenerate_sweep_rejected() {
        let mut recorder = CalibrationRecorder::default();
        recorder.start();
        stroke(&mut recorder, (100, 400), (900, 400), 30);
        assert!(matches!(
            recorder.finish(),
            Err(CalibrationError::Degenerate { .. })
        ));
    }

    #[test]
    fn test_finish_without_start() {
        let mut recorder = CalibrationRecorder::default();
        assert_eq!(recorder.finish(), Err(CalibrationError::NotRecording));
    }
}
