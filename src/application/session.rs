//! Session Core.
//!
//! Two tasks make up a running session:
//!
//! - the control task runs the [`ConnectionManager`] and owns the transport
//! - the data task owns [`SessionCore`], which decodes packets and runs the
//!   touchpad, motion, button and gesture state machines
//!
//! The control task forwards notifications to the data task over a single
//! ordered channel, together with connection state changes. All state that
//! the watchdog and packets both touch lives in the data task, so a forced
//! release can never interleave with a packet update.

use crate::domain::buttons::ButtonTracker;
use crate::domain::calibration::{CalibrationError, CalibrationRecorder};
use crate::domain::controller::TouchpadProcessor;
use crate::domain::gestures::{GestureRecognizer, TouchPoint};
use crate::domain::imu::ImuProcessor;
use crate::domain::mapping::ControlMode;
use crate::domain::models::{
    CalibrationData, ConnectionState, ControllerState, MessageSeverity, ScrollDelta, SessionEvent,
    StatusMessage, TelemetryEvent,
};
use crate::domain::settings::{ConfigUpdate, SessionConfig, Settings, SettingsStore};
use crate::infrastructure::bluetooth::connection::{
    ConnectionConfig, ConnectionManager, ControlCommand, LinkMessage, LinkReporter,
};
use crate::infrastructure::bluetooth::protocol::{format_address, PacketDecoder};
use crate::infrastructure::bluetooth::transport::BleTransport;
use crate::infrastructure::logging::RAW_DATA_TARGET;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Packet processing and input state for one controller.
///
/// Synchronous and clock-free: callers pass the capture timestamp and the
/// monotonic `now` used for debounce and the watchdog.
pub struct SessionCore {
    config: SessionConfig,
    decoder: PacketDecoder,
    touchpad: TouchpadProcessor,
    imu: ImuProcessor,
    gestures: GestureRecognizer,
    buttons: ButtonTracker,
    recorder: CalibrationRecorder,
    link_state: ConnectionState,
    raw_data_logging: bool,
}

impl SessionCore {
    pub fn new(config: SessionConfig, calibration: Option<CalibrationData>) -> Self {
        let mut touchpad = TouchpadProcessor::new(&config);
        touchpad.set_calibration(calibration);
        Self {
            decoder: PacketDecoder::new(config.touch_threshold),
            imu: ImuProcessor::new(&config),
            gestures: GestureRecognizer::new(&config),
            buttons: ButtonTracker::new(&config),
            touchpad,
            recorder: CalibrationRecorder::default(),
            link_state: ConnectionState::Disconnected,
            raw_data_logging: false,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_raw_data_logging(&mut self, enabled: bool) {
        self.raw_data_logging = enabled;
    }

    /// Packets are only processed while the link is Ready. Leaving Ready
    /// abandons any half-finished touch or motion.
    pub fn set_link_state(&mut self, state: ConnectionState) {
        if self.link_state == ConnectionState::Ready && state != ConnectionState::Ready {
            self.touchpad.reset();
            self.imu.reset();
            self.gestures.reset();
        }
        self.link_state = state;
    }

    pub fn handle_packet(&mut self, bytes: &[u8], captured_at: i64, now: Instant) -> Vec<SessionEvent> {
        if self.link_state != ConnectionState::Ready {
            debug!(state = %self.link_state, "Dropping packet, link not ready");
            return Vec::new();
        }
        if self.raw_data_logging {
            trace!(target: RAW_DATA_TARGET, len = bytes.len(), "{:02X?}", bytes);
        }

        let state = match self.decoder.decode(bytes, captured_at) {
            Ok(state) => state,
            Err(e) => {
                debug!("Dropping packet: {}", e);
                return Vec::new();
            }
        };

        let (processed_x, processed_y) = self.touchpad.process(state.axis_x, state.axis_y);
        let touched = state.touchpad_touched;
        let mut events = vec![SessionEvent::Telemetry(TelemetryEvent {
            axis_x: state.axis_x,
            axis_y: state.axis_y,
            accel: state.accel,
            gyro: state.gyro,
            buttons: state.buttons,
            touchpad_touched: touched,
            processed_x,
            processed_y,
            timestamp: state.timestamp,
        })];

        if self.config.enable_buttons {
            events.extend(
                self.buttons
                    .update(&state.buttons, now)
                    .into_iter()
                    .map(SessionEvent::Button),
            );
        }

        if self.imu.calibrate(&state.gyro).is_some() {
            events.push(status_event("Gyro calibrated", MessageSeverity::Success));
        }

        // A calibration sweep is not input
        if self.recorder.is_recording() {
            self.recorder.record(state.axis_x, state.axis_y, touched);
            return events;
        }

        match self.config.control_mode {
            ControlMode::Touchpad if self.config.enable_touchpad => {
                if let Some(delta) = self.touchpad.pointer_delta(processed_x, processed_y, touched) {
                    events.push(SessionEvent::Pointer(delta));
                }
            }
            ControlMode::Mouse => self.air_mouse(&state, processed_x, processed_y, now, &mut events),
            _ => {}
        }

        if self.config.enable_gestures {
            // Recognizer works in screen space, y down
            let point = TouchPoint::new(processed_x, -processed_y, touched);
            if let Some(gesture) = self.gestures.process(point) {
                events.push(SessionEvent::Gesture(gesture));
            }
        }

        events
    }

    /// Gyro drives the cursor, the touchpad and optionally tilt scroll,
    /// a shake re-centers
    fn air_mouse(
        &mut self,
        state: &ControllerState,
        processed_x: f64,
        processed_y: f64,
        now: Instant,
        events: &mut Vec<SessionEvent>,
    ) {
        if let Some(delta) = self.imu.air_mouse_delta(&state.gyro) {
            events.push(SessionEvent::Pointer(delta));
        }

        if self.config.enable_touchpad {
            let touched = state.touchpad_touched;
            if let Some(scroll) = self.touchpad.scroll_delta(processed_x, processed_y, touched) {
                events.push(SessionEvent::Scroll(scroll));
            }
        }

        if self.config.enable_tilt_scroll {
            if let Some(vertical) = self.imu.tilt_scroll(&state.accel, now) {
                events.push(SessionEvent::Scroll(ScrollDelta {
                    vertical,
                    horizontal: 0,
                }));
            }
        }

        if self.imu.detect_shake(&state.accel) {
            self.imu.reset_orientation();
            events.push(status_event("Orientation reset", MessageSeverity::Info));
        }
    }

    /// Watchdog tick
    pub fn tick(&mut self, now: Instant) -> Vec<SessionEvent> {
        self.buttons
            .check_stalled(now)
            .into_iter()
            .map(SessionEvent::Button)
            .collect()
    }

    /// Install a calibration; `false` when it was rejected and the default
    /// range is in use instead
    pub fn set_calibration(&mut self, calibration: CalibrationData) -> bool {
        self.touchpad.set_calibration(Some(calibration))
    }

    pub fn calibration(&self) -> Option<&CalibrationData> {
        self.touchpad.calibration()
    }

    /// Merge `update` and push the result into every processor
    pub fn update_config(&mut self, update: &ConfigUpdate) -> &SessionConfig {
        let mut config = self.config.clone();
        config.apply(update);
        self.configure(config);
        &self.config
    }

    pub fn configure(&mut self, config: SessionConfig) {
        self.decoder = PacketDecoder::new(config.touch_threshold);
        self.touchpad.configure(&config);
        self.imu.configure(&config);
        self.gestures.configure(&config);
        self.buttons.configure(&config);
        let mode_changed = config.control_mode != self.config.control_mode;
        if !config.enable_touchpad || mode_changed {
            self.touchpad.reset();
        }
        if mode_changed {
            self.imu.reset();
        }
        if !config.enable_gestures {
            self.gestures.reset();
        }
        self.config = config;
    }

    /// Average the next gyro readings into the drift offset; keep the
    /// controller still meanwhile
    pub fn start_gyro_calibration(&mut self) {
        self.imu.start_calibration();
    }

    pub fn is_calibrating_gyro(&self) -> bool {
        self.imu.is_calibrating()
    }

    pub fn start_calibration(&mut self) {
        self.touchpad.reset();
        self.gestures.reset();
        self.recorder.start();
    }

    pub fn cancel_calibration(&mut self) {
        self.recorder.cancel();
    }

    pub fn is_calibrating(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Finish the sweep and apply the result
    pub fn finish_calibration(&mut self) -> Result<CalibrationData, CalibrationError> {
        let calibration = self.recorder.finish()?;
        self.touchpad.set_calibration(Some(calibration.clone()));
        Ok(calibration)
    }
}

fn status_event(message: &str, severity: MessageSeverity) -> SessionEvent {
    SessionEvent::Status(StatusMessage {
        message: message.to_string(),
        severity,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

enum SessionCommand {
    SetCalibration(CalibrationData),
    UpdateConfig(ConfigUpdate),
    StartCalibration,
    CancelCalibration,
    FinishCalibration(oneshot::Sender<Result<CalibrationData, CalibrationError>>),
    StartGyroCalibration,
}

/// Everything a session needs besides the tuning config
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub connection: ConnectionConfig,
    pub raw_data_logging: bool,
}

impl SessionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connection: ConnectionConfig::from_settings(settings),
            raw_data_logging: settings.debug_raw_data_logging,
        }
    }
}

/// Cheap to clone; every clone drives the same session
#[derive(Clone)]
pub struct SessionHandle {
    control: mpsc::UnboundedSender<ControlCommand>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    /// Connect to `address`, cancelling any attempt in flight
    pub fn connect(&self, address: u64, timeout: Duration) -> Result<(), SessionError> {
        self.control
            .send(ControlCommand::Connect { address, timeout })
            .map_err(|_| SessionError::Closed)
    }

    /// User initiated; suppresses automatic reconnection
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.control
            .send(ControlCommand::Disconnect)
            .map_err(|_| SessionError::Closed)
    }

    pub fn set_calibration(&self, calibration: CalibrationData) -> Result<(), SessionError> {
        self.send(SessionCommand::SetCalibration(calibration))
    }

    pub fn update_config(&self, update: ConfigUpdate) -> Result<(), SessionError> {
        self.send(SessionCommand::UpdateConfig(update))
    }

    pub fn start_calibration(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StartCalibration)
    }

    pub fn cancel_calibration(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::CancelCalibration)
    }

    /// Re-measure gyro drift for air mouse mode
    pub fn start_gyro_calibration(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StartGyroCalibration)
    }

    /// Stop recording, then apply and persist the new calibration
    pub async fn finish_calibration(&self) -> Result<CalibrationData, SessionError> {
        let (reply, result) = oneshot::channel();
        self.send(SessionCommand::FinishCalibration(reply))?;
        let outcome = result.await.map_err(|_| SessionError::Closed)?;
        outcome.map_err(SessionError::from)
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Release the link and stop both tasks; the event stream ends after
    /// the final Disconnected event
    pub fn shutdown(&self) {
        let _ = self.control.send(ControlCommand::Shutdown);
    }

    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

pub struct Session;

impl Session {
    /// Start a session with the stock GATT profile. Must be called inside a
    /// tokio runtime.
    pub fn spawn<T: BleTransport>(
        transport: T,
        store: Arc<dyn SettingsStore>,
        config: SessionConfig,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::spawn_with(transport, store, config, SessionOptions::default())
    }

    pub fn spawn_with<T: BleTransport>(
        transport: T,
        store: Arc<dyn SettingsStore>,
        mut config: SessionConfig,
        options: SessionOptions,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        config.normalize();
        let mut connection = options.connection;
        connection.apply(&config);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reporter = LinkReporter::new(Arc::new(state_tx), link_tx);
        let manager = ConnectionManager::new(transport, connection, reporter);
        tokio::spawn(manager.run(control_rx));

        let calibration = store.load_calibration();
        let mut core = SessionCore::new(config, calibration);
        core.set_raw_data_logging(options.raw_data_logging);
        let task = DataTask::new(core, store, event_tx, control_tx.clone());
        tokio::spawn(task.run(link_rx, command_rx));

        info!("Session started");
        (
            SessionHandle {
                control: control_tx,
                commands: command_tx,
                state: state_rx,
            },
            event_rx,
        )
    }
}

fn watchdog(period_ms: u64) -> Interval {
    let period = Duration::from_millis(period_ms.max(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn now() -> Instant {
    // Follows tokio's clock so paused-time tests see virtual time
    tokio::time::Instant::now().into_std()
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Owner of [`SessionCore`]; the only writer of input state
struct DataTask {
    core: SessionCore,
    store: Arc<dyn SettingsStore>,
    events: mpsc::UnboundedSender<SessionEvent>,
    control: mpsc::UnboundedSender<ControlCommand>,
    watchdog: Interval,
}

impl DataTask {
    fn new(
        core: SessionCore,
        store: Arc<dyn SettingsStore>,
        events: mpsc::UnboundedSender<SessionEvent>,
        control: mpsc::UnboundedSender<ControlCommand>,
    ) -> Self {
        let watchdog = watchdog(core.config().watchdog_interval_ms);
        Self {
            core,
            store,
            events,
            control,
            watchdog,
        }
    }

    /// Runs until the control task is gone and its last messages are handled
    async fn run(
        mut self,
        mut link: mpsc::UnboundedReceiver<LinkMessage>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        let mut commands_open = true;
        loop {
            tokio::select! {
                // Queued packets go before the watchdog looks at them
                biased;
                message = link.recv() => match message {
                    Some(message) => self.on_link(message),
                    None => break,
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        // Every handle is gone
                        commands_open = false;
                        let _ = self.control.send(ControlCommand::Shutdown);
                    }
                },
                _ = self.watchdog.tick() => {
                    let events = self.core.tick(now());
                    self.emit(events);
                }
            }
        }
        info!("Session stopped");
    }

    fn emit(&self, events: Vec<SessionEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }

    fn status(&self, message: &str, severity: MessageSeverity) {
        let _ = self.events.send(status_event(message, severity));
    }

    fn on_link(&mut self, message: LinkMessage) {
        match message {
            LinkMessage::Packet(packet) => {
                let events = self.core.handle_packet(&packet, unix_millis(), now());
                self.emit(events);
            }
            LinkMessage::Connected(address) => {
                if let Err(e) = self.store.remember_address(address) {
                    warn!("Failed to remember {}: {}", format_address(address), e);
                }
            }
            LinkMessage::Connection(event) => {
                self.core.set_link_state(event.state);
                let _ = self.events.send(SessionEvent::Connection(event));
            }
            LinkMessage::Status(message) => {
                let _ = self.events.send(SessionEvent::Status(message));
            }
        }
    }

    fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetCalibration(calibration) => {
                if self.core.set_calibration(calibration.clone()) {
                    let _ = self.events.send(SessionEvent::CalibrationApplied(calibration));
                } else {
                    self.status(
                        "Calibration rejected (max must exceed min), using default range",
                        MessageSeverity::Warning,
                    );
                }
            }
            SessionCommand::UpdateConfig(update) => {
                let previous_period = self.core.config().watchdog_interval_ms;
                let config = self.core.update_config(&update).clone();
                if config.watchdog_interval_ms != previous_period {
                    self.watchdog = watchdog(config.watchdog_interval_ms);
                }
                if let Err(e) = self.store.save_config(&config) {
                    warn!("Failed to save config: {}", e);
                }
                let _ = self.control.send(ControlCommand::Configure(config.clone()));
                debug!(?config, "Config updated");
                let _ = self.events.send(SessionEvent::ConfigChanged(config));
            }
            SessionCommand::StartCalibration => {
                self.core.start_calibration();
                self.status(
                    "Calibrating: sweep your finger over the whole touchpad",
                    MessageSeverity::Info,
                );
            }
            SessionCommand::CancelCalibration => {
                self.core.cancel_calibration();
                self.status("Calibration cancelled", MessageSeverity::Info);
            }
            SessionCommand::FinishCalibration(reply) => {
                let result = self.core.finish_calibration();
                match &result {
                    Ok(calibration) => {
                        if let Err(e) = self.store.save_calibration(calibration) {
                            warn!("Failed to save calibration: {}", e);
                        }
                        self.status("Calibration saved", MessageSeverity::Success);
                        let _ = self
                            .events
                            .send(SessionEvent::CalibrationApplied(calibration.clone()));
                    }
                    Err(e) => self.status(&format!("Calibration failed: {}", e), MessageSeverity::Error),
                }
                let _ = reply.send(result);
            }
            SessionCommand::StartGyroCalibration => {
                self.core.start_gyro_calibration();
                self.status(
                    "Calibrating gyro: keep the controller still",
                    MessageSeverity::Info,
                );
            }
        }
    }
}
