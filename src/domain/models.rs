use serde::{Deserialize, Serialize};

/// Button flags decoded from the controller's button byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buttons {
    pub trigger: bool,
    pub home: bool,
    pub back: bool,
    pub touchpad_click: bool,
    pub volume_up: bool,
    pub volume_down: bool,
    /// Set by the firmware when nothing is held
    pub no_button: bool,
}

impl Buttons {
    pub fn is_pressed(&self, button: Button) -> bool {
        match button {
            Button::Trigger => self.trigger,
            Button::Home => self.home,
            Button::Back => self.back,
            Button::TouchpadClick => self.touchpad_click,
            Button::VolumeUp => self.volume_up,
            Button::VolumeDown => self.volume_down,
        }
    }
}

/// Logical buttons tracked for edge detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Trigger,
    Home,
    Back,
    TouchpadClick,
    VolumeUp,
    VolumeDown,
}

impl Button {
    pub const ALL: [Button; 6] = [
        Button::Trigger,
        Button::Home,
        Button::Back,
        Button::TouchpadClick,
        Button::VolumeUp,
        Button::VolumeDown,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Three-axis sensor reading in physical units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Decoded state of one telemetry packet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    // Raw touchpad coordinates (10-bit)
    pub axis_x: u16,
    pub axis_y: u16,

    // Accelerometer (milli-g scale) and gyroscope (milli-degrees/s scale)
    pub accel: Vector3,
    pub gyro: Vector3,

    pub buttons: Buttons,
    pub touchpad_touched: bool,

    // Capture time (Unix milliseconds)
    pub timestamp: i64,
}

/// Running average of the displacement seen while sweeping in one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionalSample {
    pub avg_dx: f64,
    pub avg_dy: f64,
    pub count: u32,
}

impl DirectionalSample {
    pub fn add(&mut self, dx: f64, dy: f64) {
        self.count += 1;
        let n = self.count as f64;
        self.avg_dx += (dx - self.avg_dx) / n;
        self.avg_dy += (dy - self.avg_dy) / n;
    }
}

/// Touchpad bounds in raw coordinate space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub min_x: u16,
    pub max_x: u16,
    pub min_y: u16,
    pub max_y: u16,
    pub center_x: u16,
    pub center_y: u16,
    #[serde(default)]
    pub up: DirectionalSample,
    #[serde(default)]
    pub down: DirectionalSample,
    #[serde(default)]
    pub left: DirectionalSample,
    #[serde(default)]
    pub right: DirectionalSample,
}

impl CalibrationData {
    /// Build a calibration whose center is the midpoint of the given bounds
    pub fn from_bounds(min_x: u16, max_x: u16, min_y: u16, max_y: u16) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
            center_x: ((min_x as u32 + max_x as u32) / 2) as u16,
            center_y: ((min_y as u32 + max_y as u32) / 2) as u16,
            up: DirectionalSample::default(),
            down: DirectionalSample::default(),
            left: DirectionalSample::default(),
            right: DirectionalSample::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.max_x > self.min_x && self.max_y > self.min_y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Discovering,
    Ready,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Emitted once per successfully decoded packet
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub axis_x: u16,
    pub axis_y: u16,
    pub accel: Vector3,
    pub gyro: Vector3,
    pub buttons: Buttons,
    pub touchpad_touched: bool,
    /// Normalized touchpad position in [-1, 1], up is positive
    pub processed_x: f64,
    pub processed_y: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureEvent {
    pub direction: GestureDirection,
}

/// Accepted button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: Button,
    pub pressed: bool,
    /// True when the watchdog forced the release
    pub synthetic: bool,
}

/// Cursor movement in screen pixels (y grows downwards)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerDelta {
    pub dx: i32,
    pub dy: i32,
}

/// Wheel notches; positive scrolls up and right
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollDelta {
    pub vertical: i32,
    pub horizontal: i32,
}

/// Broad cause of a failed connect, for remediation hints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Timeout,
    NotFound,
    MissingService,
    WriteFailure,
    Subscription,
    Transport,
    Cancelled,
}

impl FailureCategory {
    /// What the user can do about it
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Timeout => {
                "Controller did not respond in time. Move closer and press Home to wake it."
            }
            Self::NotFound => {
                "Controller not found. Re-enable pairing mode (hold Home until the LED blinks) and check the address."
            }
            Self::MissingService => {
                "Device is not a Gear VR controller or its services are hidden. Remove it from Bluetooth settings and pair again."
            }
            Self::WriteFailure => {
                "Controller rejected the setup commands. Move closer or re-pair the controller."
            }
            Self::Subscription => {
                "Could not receive controller data. Please accept the pairing dialog when it appears."
            }
            Self::Transport => "Bluetooth error. Check that Bluetooth is turned on.",
            Self::Cancelled => "Connection attempt cancelled.",
        }
    }
}

/// Why a link attempt failed, as reported to the session's consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFailure {
    pub category: FailureCategory,
    /// Retrying will not help (wrong device, missing characteristic)
    pub fatal: bool,
    /// Technical description of the underlying error
    pub detail: String,
}

impl LinkFailure {
    pub fn cancelled() -> Self {
        Self {
            category: FailureCategory::Cancelled,
            fatal: false,
            detail: "connection attempt cancelled".to_string(),
        }
    }

    /// Status line with a hint on what the user can do about it
    pub fn user_message(&self) -> String {
        format!("{} ({})", self.category.hint(), self.detail)
    }
}

impl std::fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.detail)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStatusEvent {
    pub state: ConnectionState,
    /// Failure that caused this transition, if any
    pub error: Option<LinkFailure>,
    /// Set when the session gave up and needs a user-initiated connect
    pub terminal: bool,
}

impl ConnectionStatusEvent {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            error: None,
            terminal: false,
        }
    }

    /// Human readable status line for the UI
    pub fn status_text(&self) -> String {
        match (&self.error, self.terminal) {
            (Some(error), true) => format!("Disconnected: {}", error.user_message()),
            (Some(error), false) => format!("{}: {}", self.state, error.user_message()),
            (None, _) => match self.state {
                ConnectionState::Disconnected => "Disconnected".to_string(),
                ConnectionState::Connecting => "Connecting to controller...".to_string(),
                ConnectionState::Discovering => "Discovering controller services...".to_string(),
                ConnectionState::Ready => "Connected to Gear VR Controller".to_string(),
                ConnectionState::Reconnecting => "Connection lost, reconnecting...".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// Everything the session reports to its consumer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Telemetry(TelemetryEvent),
    Button(ButtonEvent),
    Pointer(PointerDelta),
    Scroll(ScrollDelta),
    Gesture(GestureEvent),
    Connection(ConnectionStatusEvent),
    Status(StatusMessage),
    ConfigChanged(crate::domain::settings::SessionConfig),
    CalibrationApplied(CalibrationData),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_validity() {
        assert!(CalibrationData::from_bounds(10, 900, 20, 800).is_valid());
        assert!(!CalibrationData::from_bounds(500, 500, 20, 800).is_valid());
        assert!(!CalibrationData::from_bounds(10, 900, 800, 20).is_valid());
    }

    #[test]
    fn test_directional_sample_running_average() {
        let mut sample = DirectionalSample::default();
        sample.add(0.2, 0.0);
        sample.add(0.4, 0.1);
        assert_eq!(sample.count, 2);
        assert!((sample.avg_dx - 0.3).abs() < 1e-9);
        assert!((sample.avg_dy - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_failure_status_text_carries_hint() {
        let event = ConnectionStatusEvent {
            state: ConnectionState::Disconnected,
            error: Some(LinkFailure {
                category: FailureCategory::NotFound,
                fatal: false,
                detail: "no device answered at 0xAABB".to_string(),
            }),
            terminal: true,
        };
        let text = event.status_text();
        assert!(text.starts_with("Disconnected: Controller not found."));
        assert!(text.ends_with("(no device answered at 0xAABB)"));
    }

    #[test]
    fn test_center_from_bounds() {
        let calibration = CalibrationData::from_bounds(100, 901, 0, 1023);
        assert_eq!(calibration.center_x, 500);
        assert_eq!(calibration.center_y, 511);
    }
}
