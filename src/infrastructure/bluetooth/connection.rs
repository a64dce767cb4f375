//! BLE Connection Module
//!
//! Owns the controller link for the lifetime of a session: device
//! resolution, pairing, GATT discovery, the setup command sequence, notification
//! subscription, link loss detection and bounded reconnection.
//!
//! Everything runs on one control task. Connect attempts are raced against
//! incoming commands so a new request cancels the one in flight, and the
//! single task is what keeps reconnect sequences from overlapping.

pub use crate::domain::models::FailureCategory;
use crate::domain::models::{
    ConnectionState, ConnectionStatusEvent, LinkFailure, MessageSeverity, StatusMessage,
};
use crate::domain::settings::{SessionConfig, Settings};
use crate::infrastructure::bluetooth::protocol::{self, format_address, ControllerCommand};
use crate::infrastructure::bluetooth::transport::{
    BleTransport, CancelToken, GattHandle, PairingOutcome, TransportError, TransportEvent,
    WriteStatus,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Service UUID to look for
    pub service_uuid: Uuid,
    /// Data characteristic UUID
    pub data_char_uuid: Uuid,
    /// Command characteristic UUID
    pub command_char_uuid: Uuid,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Used for automatic reconnects; user connects bring their own
    pub connect_timeout: Duration,
    /// Pause between setup writes
    pub command_delay: Duration,
    /// Pairing requests before connecting unpaired; 0 skips pairing
    pub max_pairing_retries: u32,
    pub pairing_retry_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let mut config = Self {
            service_uuid: protocol::SERVICE_UUID,
            data_char_uuid: protocol::DATA_CHAR_UUID,
            command_char_uuid: protocol::COMMAND_CHAR_UUID,
            max_reconnect_attempts: 0,
            reconnect_delay: Duration::ZERO,
            connect_timeout: Duration::ZERO,
            command_delay: Duration::ZERO,
            max_pairing_retries: 0,
            pairing_retry_delay: Duration::ZERO,
        };
        config.apply(&SessionConfig::default());
        config
    }
}

impl ConnectionConfig {
    /// Build from persisted settings, falling back to the stock UUIDs when an
    /// override does not parse
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = Self::default();
        config.service_uuid = parse_uuid_or(&settings.ble_service_uuid, protocol::SERVICE_UUID);
        config.data_char_uuid = parse_uuid_or(&settings.ble_data_char_uuid, protocol::DATA_CHAR_UUID);
        config.command_char_uuid =
            parse_uuid_or(&settings.ble_command_char_uuid, protocol::COMMAND_CHAR_UUID);
        config.apply(&settings.input);
        config
    }

    /// Take over the link timings from a session config
    pub fn apply(&mut self, config: &SessionConfig) {
        self.max_reconnect_attempts = config.max_reconnect_attempts;
        self.reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);
        self.connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        self.command_delay = Duration::from_millis(config.command_delay_ms);
        self.max_pairing_retries = config.pairing_max_retries;
        self.pairing_retry_delay = Duration::from_millis(config.pairing_retry_delay_ms);
    }
}

fn parse_uuid_or(text: &str, fallback: Uuid) -> Uuid {
    match Uuid::parse_str(text.trim()) {
        Ok(uuid) => uuid,
        Err(e) => {
            warn!("Invalid UUID override {:?} ({}), using {}", text, e, fallback);
            fallback
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectError {
    #[error("no device answered at {address:#X}")]
    DeviceNotFound { address: u64, timed_out: bool },
    #[error("controller service not found")]
    MissingService,
    #[error("characteristic {uuid} not found")]
    MissingCharacteristic { uuid: Uuid },
    #[error("writing {command:?} failed: {status}")]
    WriteFailed {
        command: ControllerCommand,
        status: WriteStatus,
    },
    #[error("could not enable notifications: {reason}")]
    SubscriptionFailed { reason: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::DeviceNotFound {
                timed_out: true, ..
            } => FailureCategory::Timeout,
            Self::DeviceNotFound { .. } => FailureCategory::NotFound,
            Self::MissingService | Self::MissingCharacteristic { .. } => {
                FailureCategory::MissingService
            }
            Self::WriteFailed { .. } => FailureCategory::WriteFailure,
            Self::SubscriptionFailed { .. } => FailureCategory::Subscription,
            Self::Transport(_) => FailureCategory::Transport,
            Self::Cancelled => FailureCategory::Cancelled,
        }
    }

    /// Status line with a hint on what the user can do about it
    pub fn user_message(&self) -> String {
        LinkFailure::from(self).user_message()
    }

    /// Discovery failures do not heal by retrying
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingService | Self::MissingCharacteristic { .. }
        )
    }
}

impl From<&ConnectError> for LinkFailure {
    fn from(error: &ConnectError) -> Self {
        Self {
            category: error.category(),
            fatal: error.is_fatal(),
            detail: error.to_string(),
        }
    }
}

impl From<ConnectError> for LinkFailure {
    fn from(error: ConnectError) -> Self {
        Self::from(&error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Connect { address: u64, timeout: Duration },
    Disconnect,
    Configure(SessionConfig),
    Shutdown,
}

/// What the control task hands to the data task, in order
#[derive(Debug, Clone)]
pub enum LinkMessage {
    Packet(Vec<u8>),
    Connected(u64),
    Connection(ConnectionStatusEvent),
    Status(StatusMessage),
}

/// Publishes state changes and forwards link traffic
#[derive(Debug, Clone)]
pub struct LinkReporter {
    state: Arc<watch::Sender<ConnectionState>>,
    messages: mpsc::UnboundedSender<LinkMessage>,
}

impl LinkReporter {
    pub fn new(
        state: Arc<watch::Sender<ConnectionState>>,
        messages: mpsc::UnboundedSender<LinkMessage>,
    ) -> Self {
        Self { state, messages }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Publish a state; repeats without an error attached are swallowed
    fn transition(&self, event: ConnectionStatusEvent) {
        let previous = self.state.send_replace(event.state);
        if previous == event.state && event.error.is_none() {
            return;
        }
        info!("Connection state: {} -> {}", previous, event.state);
        let _ = self.messages.send(LinkMessage::Connection(event));
    }

    fn connected(&self, address: u64) {
        let _ = self.messages.send(LinkMessage::Connected(address));
    }

    fn forward(&self, packet: Vec<u8>) {
        let _ = self.messages.send(LinkMessage::Packet(packet));
    }

    /// Send a log message
    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self.messages.send(LinkMessage::Status(StatusMessage {
            message: message.into(),
            severity,
        }));
    }
}

/// Everything held while a controller is connected
struct Link<T: BleTransport> {
    address: u64,
    device: T::Device,
    subscription: T::Subscription,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

enum Attempt<T: BleTransport> {
    Connected(Link<T>),
    Failed(ConnectError),
    /// A command arrived mid-attempt; the attempt has already unwound
    Interrupted(ControlCommand),
}

pub struct ConnectionManager<T: BleTransport> {
    transport: T,
    config: ConnectionConfig,
    reporter: LinkReporter,
    link: Option<Link<T>>,
}

impl<T: BleTransport> ConnectionManager<T> {
    pub fn new(transport: T, config: ConnectionConfig, reporter: LinkReporter) -> Self {
        Self {
            transport,
            config,
            reporter,
            link: None,
        }
    }

    /// Control loop. Returns after `Shutdown` or when every command sender
    /// is gone, with the link released.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ControlCommand>) {
        debug!("Connection manager started");
        let mut pending = None;

        loop {
            let command = match pending.take() {
                Some(command) => command,
                None => tokio::select! {
                    command = commands.recv() => command.unwrap_or(ControlCommand::Shutdown),
                    event = next_event(&mut self.link) => {
                        pending = self.on_link_event(event, &mut commands).await;
                        continue;
                    }
                },
            };

            match command {
                ControlCommand::Connect { address, timeout } => {
                    pending = self.connect(address, timeout, &mut commands).await;
                }
                ControlCommand::Disconnect => self.disconnect(),
                ControlCommand::Configure(config) => self.config.apply(&config),
                ControlCommand::Shutdown => break,
            }
        }

        self.disconnect();
        debug!("Connection manager stopped");
    }

    async fn on_link_event(
        &mut self,
        event: Option<TransportEvent>,
        commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Option<ControlCommand> {
        match event {
            Some(TransportEvent::Notification(packet)) => {
                self.reporter.forward(packet);
                None
            }
            // A closed channel means the transport dropped our handlers
            Some(TransportEvent::Disconnected) | None => self.on_link_lost(commands).await,
        }
    }

    async fn on_link_lost(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Option<ControlCommand> {
        // Only a live link starts a reconnect sequence
        if self.reporter.state() != ConnectionState::Ready {
            return None;
        }
        let address = self.link.as_ref()?.address;
        self.release();

        warn!("Link to {} lost", format_address(address));
        self.reporter
            .send_log("Controller connection lost", MessageSeverity::Warning);
        self.reconnect(address, commands).await
    }

    async fn connect(
        &mut self,
        address: u64,
        timeout: Duration,
        commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Option<ControlCommand> {
        self.release();
        info!("Connecting to Bluetooth device: {}", format_address(address));
        self.reporter
            .send_log("Connecting to device...", MessageSeverity::Info);

        match self.attempt(address, timeout, commands).await {
            Attempt::Connected(link) => {
                self.install(link);
                None
            }
            Attempt::Failed(error) => {
                self.give_up(Some(error));
                None
            }
            Attempt::Interrupted(command) => {
                self.cancelled();
                Some(command)
            }
        }
    }

    async fn reconnect(
        &mut self,
        address: u64,
        commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Option<ControlCommand> {
        let mut last_error = None;
        let mut attempt = 0;

        // Limit is re-read so config updates apply to a running sequence
        while attempt < self.config.max_reconnect_attempts {
            attempt += 1;
            let max = self.config.max_reconnect_attempts;
            self.reporter
                .transition(ConnectionStatusEvent::new(ConnectionState::Reconnecting));
            info!(attempt, max, "Reconnecting in {:?}", self.config.reconnect_delay);
            self.reporter.send_log(
                format!("Reconnecting (attempt {}/{})...", attempt, max),
                MessageSeverity::Warning,
            );

            if let Some(command) = self.wait(self.config.reconnect_delay, commands).await {
                info!("Reconnect interrupted by {:?}", command);
                self.reporter
                    .transition(ConnectionStatusEvent::new(ConnectionState::Disconnected));
                return Some(command);
            }

            let timeout = self.config.connect_timeout;
            match self.attempt(address, timeout, commands).await {
                Attempt::Connected(link) => {
                    info!(attempt, "Reconnected");
                    self.install(link);
                    return None;
                }
                Attempt::Failed(error) if error.is_fatal() => {
                    self.give_up(Some(error));
                    return None;
                }
                Attempt::Failed(error) => {
                    warn!(attempt, "Reconnect attempt failed: {}", error);
                    last_error = Some(error);
                }
                Attempt::Interrupted(command) => {
                    self.cancelled();
                    return Some(command);
                }
            }
        }

        error!("Giving up after {} reconnect attempts", attempt);
        self.give_up(last_error);
        None
    }

    /// Run one connect attempt while still listening for commands. Config
    /// updates are absorbed; anything else cancels the attempt, waits for it
    /// to release what it acquired and is handed back.
    async fn attempt(
        &mut self,
        address: u64,
        timeout: Duration,
        commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Attempt<T> {
        let cancel = CancelToken::new();
        let config = self.config.clone();
        let establishing = establish(&self.transport, &self.reporter, &config, address, timeout, &cancel);
        tokio::pin!(establishing);

        let interrupt = loop {
            tokio::select! {
                result = &mut establishing => {
                    return match result {
                        Ok(link) => Attempt::Connected(link),
                        Err(error) => Attempt::Failed(error),
                    };
                }
                command = commands.recv() => match command {
                    Some(ControlCommand::Configure(update)) => self.config.apply(&update),
                    Some(command) => break command,
                    None => break ControlCommand::Shutdown,
                },
            }
        };

        cancel.cancel();
        if let Ok(link) = establishing.await {
            self.transport.unsubscribe(link.subscription);
            self.transport.disconnect(link.device);
        }
        Attempt::Interrupted(interrupt)
    }

    /// Sleep for `delay`, absorbing config updates. Any other command ends
    /// the wait early and is handed back.
    async fn wait(
        &mut self,
        delay: Duration,
        commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Option<ControlCommand> {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return None,
                command = commands.recv() => match command {
                    Some(ControlCommand::Configure(update)) => self.config.apply(&update),
                    Some(command) => return Some(command),
                    None => return Some(ControlCommand::Shutdown),
                },
            }
        }
    }

    fn install(&mut self, link: Link<T>) {
        self.reporter.connected(link.address);
        self.link = Some(link);
        self.reporter
            .transition(ConnectionStatusEvent::new(ConnectionState::Ready));
        self.reporter
            .send_log("Connection established!", MessageSeverity::Success);
    }

    fn give_up(&self, error: Option<ConnectError>) {
        let message = match &error {
            Some(error) => {
                error!("Connection failed: {}", error);
                format!("Connection failed: {}", error.user_message())
            }
            None => "Connection lost".to_string(),
        };
        self.reporter.send_log(message, MessageSeverity::Error);
        self.reporter.transition(ConnectionStatusEvent {
            state: ConnectionState::Disconnected,
            error: error.map(LinkFailure::from),
            terminal: true,
        });
    }

    fn cancelled(&self) {
        info!("Connection attempt cancelled");
        self.reporter.transition(ConnectionStatusEvent {
            state: ConnectionState::Disconnected,
            error: Some(LinkFailure::cancelled()),
            terminal: false,
        });
    }

    /// User initiated disconnect; never followed by a reconnect
    fn disconnect(&mut self) {
        if self.link.is_some() {
            self.release();
            info!("Disconnected from device");
            self.reporter
                .send_log("Disconnected from device", MessageSeverity::Info);
        }
        self.reporter
            .transition(ConnectionStatusEvent::new(ConnectionState::Disconnected));
    }

    /// Drop handlers first so nothing fires for a closed device
    fn release(&mut self) {
        if let Some(link) = self.link.take() {
            self.transport.unsubscribe(link.subscription);
            self.transport.disconnect(link.device);
        }
    }
}

async fn next_event<T: BleTransport>(link: &mut Option<Link<T>>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancelToken,
    future: F,
) -> Result<F::Output, ConnectError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConnectError::Cancelled),
        output = future => Ok(output),
    }
}

/// Connecting -> paired -> Discovering -> setup -> subscribed. On failure every
/// resource acquired so far is released before returning.
async fn establish<T: BleTransport>(
    transport: &T,
    reporter: &LinkReporter,
    config: &ConnectionConfig,
    address: u64,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Link<T>, ConnectError> {
    reporter.transition(ConnectionStatusEvent::new(ConnectionState::Connecting));
    let device = resolve(transport, address, timeout, cancel).await?;
    info!("Device found: {}", format_address(address));

    let opened = async {
        pair_device(transport, reporter, config, &device, cancel).await?;
        open_link(transport, reporter, config, &device, cancel).await
    }
    .await;
    match opened {
        Ok((subscription, events)) => Ok(Link {
            address,
            device,
            subscription,
            events,
        }),
        Err(e) => {
            transport.disconnect(device);
            Err(e)
        }
    }
}

async fn resolve<T: BleTransport>(
    transport: &T,
    address: u64,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<T::Device, ConnectError> {
    let lookup = tokio::time::timeout(timeout, transport.resolve_device(address));
    match until_cancelled(cancel, lookup).await? {
        Ok(Ok(Some(device))) => Ok(device),
        Ok(Ok(None)) => Err(ConnectError::DeviceNotFound {
            address,
            timed_out: false,
        }),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ConnectError::DeviceNotFound {
            address,
            timed_out: true,
        }),
    }
}

/// Pair before discovery. BLE controllers often work unpaired, so running out
/// of attempts only warns and the connect goes on.
async fn pair_device<T: BleTransport>(
    transport: &T,
    reporter: &LinkReporter,
    config: &ConnectionConfig,
    device: &T::Device,
    cancel: &CancelToken,
) -> Result<(), ConnectError> {
    let attempts = config.max_pairing_retries;
    for attempt in 1..=attempts {
        match until_cancelled(cancel, transport.pair(device)).await? {
            Ok(PairingOutcome::AlreadyPaired) => {
                info!("Device already paired");
                return Ok(());
            }
            Ok(PairingOutcome::Paired) => {
                reporter.send_log("Pairing successful!", MessageSeverity::Success);
                return Ok(());
            }
            Ok(PairingOutcome::NotRequired) => {
                info!("Pairing declined, BLE device may not require it");
                reporter.send_log(
                    "Device may not require pairing, continuing...",
                    MessageSeverity::Info,
                );
                return Ok(());
            }
            Ok(PairingOutcome::Rejected(reason)) => {
                warn!("Pairing attempt {}/{} rejected: {}", attempt, attempts, reason);
                reporter.send_log(
                    format!("Pairing rejected ({}). Please accept when prompted.", reason),
                    MessageSeverity::Warning,
                );
            }
            Err(e) => warn!("Pairing attempt {}/{} failed: {}", attempt, attempts, e),
        }

        if attempt < attempts {
            until_cancelled(cancel, tokio::time::sleep(config.pairing_retry_delay)).await?;
        }
    }

    if attempts > 0 {
        warn!("All pairing attempts failed, continuing anyway...");
        reporter.send_log(
            "Pairing incomplete, attempting connection...",
            MessageSeverity::Warning,
        );
    }
    Ok(())
}

async fn open_link<T: BleTransport>(
    transport: &T,
    reporter: &LinkReporter,
    config: &ConnectionConfig,
    device: &T::Device,
    cancel: &CancelToken,
) -> Result<(T::Subscription, mpsc::UnboundedReceiver<TransportEvent>), ConnectError> {
    reporter.transition(ConnectionStatusEvent::new(ConnectionState::Discovering));
    reporter.send_log("Discovering controller services...", MessageSeverity::Info);

    let services = until_cancelled(cancel, transport.services(device)).await??;
    let service = services
        .into_iter()
        .find(|service| service.uuid() == config.service_uuid)
        .ok_or(ConnectError::MissingService)?;
    info!("Found controller service");

    let characteristics = until_cancelled(cancel, transport.characteristics(&service)).await??;
    info!("Found {} characteristics", characteristics.len());
    let data = find_characteristic(&characteristics, config.data_char_uuid)?;
    let command = find_characteristic(&characteristics, config.command_char_uuid)?;

    send_setup_commands(transport, reporter, config, &command, cancel).await?;

    // A hung descriptor write must not hold up a disconnect; dropping the
    // future unregisters whatever it had set up.
    let (sender, events) = mpsc::unbounded_channel();
    let subscribing = tokio::time::timeout(
        config.connect_timeout,
        transport.subscribe(device, &data, sender),
    );
    let subscription = match until_cancelled(cancel, subscribing).await? {
        Ok(result) => result.map_err(|e| ConnectError::SubscriptionFailed {
            reason: e.to_string(),
        })?,
        Err(_) => {
            return Err(ConnectError::SubscriptionFailed {
                reason: "timed out".to_string(),
            })
        }
    };
    if cancel.is_cancelled() {
        transport.unsubscribe(subscription);
        return Err(ConnectError::Cancelled);
    }
    info!("Notifications enabled");
    Ok((subscription, events))
}

fn find_characteristic<C: GattHandle>(characteristics: &[C], uuid: Uuid) -> Result<C, ConnectError> {
    characteristics
        .iter()
        .find(|characteristic| characteristic.uuid() == uuid)
        .cloned()
        .ok_or(ConnectError::MissingCharacteristic { uuid })
}

/// Send initialization commands to the controller
async fn send_setup_commands<T: BleTransport>(
    transport: &T,
    reporter: &LinkReporter,
    config: &ConnectionConfig,
    characteristic: &T::Characteristic,
    cancel: &CancelToken,
) -> Result<(), ConnectError> {
    info!("Sending initialization commands...");
    reporter.send_log("Initializing controller...", MessageSeverity::Info);

    for (index, command) in protocol::setup_commands().enumerate() {
        if index > 0 {
            until_cancelled(cancel, tokio::time::sleep(config.command_delay)).await?;
        }
        let status = until_cancelled(cancel, transport.write(characteristic, command.as_bytes())).await??;
        if status != WriteStatus::Success {
            warn!(?command, %status, "Setup write failed");
            return Err(ConnectError::WriteFailed { command, status });
        }
        debug!(?command, "Setup command written");
    }

    info!("Initialization commands sent");
    Ok(())
}
