use crate::domain::models::{GestureDirection, GestureEvent};
use crate::domain::settings::SessionConfig;
use std::collections::VecDeque;
use tracing::debug;

/// Points kept for direction estimation
pub const SAMPLE_COUNT: usize = 5;

/// Touch sample in normalized screen space (x right, y down)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub x: f64,
    pub y: f64,
    pub is_touched: bool,
}

impl TouchPoint {
    pub fn new(x: f64, y: f64, is_touched: bool) -> Self {
        Self { x, y, is_touched }
    }
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    min_gesture_distance: f64,
    sensitivity: f64,
    tolerance_deg: f64,
}

impl From<&SessionConfig> for Thresholds {
    fn from(config: &SessionConfig) -> Self {
        Self {
            min_gesture_distance: config.min_gesture_distance,
            sensitivity: config.gesture_sensitivity,
            tolerance_deg: config.gesture_tolerance_deg,
        }
    }
}

/// Detects swipes from a stream of touch points.
///
/// A gesture is evaluated once per touch, on release, from the first to the
/// last point still held in the bounded sample queue.
pub struct GestureRecognizer {
    points: VecDeque<TouchPoint>,
    start_point: Option<TouchPoint>,
    is_gesture_in_progress: bool,
    // Latched at touch-down from `configured`
    thresholds: Thresholds,
    configured: Thresholds,
}

impl GestureRecognizer {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            points: VecDeque::with_capacity(SAMPLE_COUNT),
            start_point: None,
            is_gesture_in_progress: false,
            thresholds: Thresholds::from(config),
            configured: Thresholds::from(config),
        }
    }

    /// Applies from the next touch-down; a touch already in progress keeps
    /// the thresholds it started with.
    pub fn configure(&mut self, config: &SessionConfig) {
        self.configured = Thresholds::from(config);
        if !self.is_gesture_in_progress {
            self.thresholds = self.configured;
        }
    }

    pub fn is_gesture_in_progress(&self) -> bool {
        self.is_gesture_in_progress
    }

    /// Where the current touch began
    pub fn start_point(&self) -> Option<TouchPoint> {
        self.start_point
    }

    /// Drop an unresolved touch without emitting anything
    pub fn reset(&mut self) {
        self.points.clear();
        self.start_point = None;
        self.is_gesture_in_progress = false;
    }

    pub fn process(&mut self, point: TouchPoint) -> Option<GestureEvent> {
        match (self.is_gesture_in_progress, point.is_touched) {
            (false, true) => {
                self.start_gesture(point);
                None
            }
            (true, true) => {
                self.update_gesture(point);
                None
            }
            (true, false) => self.end_gesture(),
            (false, false) => None,
        }
    }

    fn start_gesture(&mut self, point: TouchPoint) {
        self.thresholds = self.configured;
        self.start_point = Some(point);
        self.points.clear();
        self.points.push_back(point);
        self.is_gesture_in_progress = true;
    }

    fn update_gesture(&mut self, point: TouchPoint) {
        self.points.push_back(point);
        if self.points.len() > SAMPLE_COUNT {
            self.points.pop_front();
        }
    }

    fn end_gesture(&mut self) -> Option<GestureEvent> {
        let direction = match (self.points.front(), self.points.back()) {
            (Some(first), Some(last)) if self.points.len() >= 2 => {
                self.calculate_direction(*first, *last)
            }
            _ => None,
        };
        self.reset();

        if let Some(direction) = direction {
            debug!(?direction, "Swipe recognized");
        }
        direction.map(|direction| GestureEvent { direction })
    }

    fn calculate_direction(&self, start: TouchPoint, end: TouchPoint) -> Option<GestureDirection> {
        let dx = end.x - start.x;
        // y grows downwards: a swipe towards the top has dy < 0
        let dy = end.y - start.y;

        let distance = (dx * dx + dy * dy).sqrt();
        let threshold = self.thresholds.min_gesture_distance * self.thresholds.sensitivity;
        if distance < threshold {
            return None;
        }

        let mut degrees = dy.atan2(dx).to_degrees();
        if degrees < 0.0 {
            degrees += 360.0;
        }
        if degrees >= 360.0 {
            degrees -= 360.0;
        }

        // Sectors are checked in a fixed order so overlapping tolerances stay
        // deterministic.
        let tolerance = self.thresholds.tolerance_deg;
        if degrees >= (360.0 - tolerance) || degrees < tolerance {
            Some(GestureDirection::Right)
        } else if degrees >= (90.0 - tolerance) && degrees < (90.0 + tolerance) {
            Some(GestureDirection::Down)
        } else if degrees >= (180.0 - tolerance) && degrees < (180.0 + tolerance) {
            Some(GestureDirection::Left)
        } else if degrees >= (270.0 - tolerance) && degrees < (270.0 + tolerance) {
            Some(GestureDirection::Up)
        } else {
            None
        }
    }
}
