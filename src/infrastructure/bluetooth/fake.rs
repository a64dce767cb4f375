//! Scripted in-memory transport for tests.

use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    BleTransport, GattHandle, PairingOutcome, TransportError, TransportEvent, WriteStatus,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDevice {
    pub address: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeHandle(Uuid);

impl GattHandle for FakeHandle {
    fn uuid(&self) -> Uuid {
        self.0
    }
}

#[derive(Debug)]
pub struct FakeSubscription(u64);

struct State {
    device_present: bool,
    resolve_delay: Duration,
    write_delay: Duration,
    subscribe_delay: Duration,
    pairing: VecDeque<Result<PairingOutcome, TransportError>>,
    services: Vec<Uuid>,
    characteristics: Vec<Uuid>,
    failing_write: Option<(usize, WriteStatus)>,
    subscribe_error: Option<TransportError>,

    resolve_calls: usize,
    pair_calls: usize,
    writes: Vec<Vec<u8>>,
    open_devices: usize,
    next_subscription: u64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<TransportEvent>)>,
}

/// Clones share one script and one record of what happened
#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<State>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    /// A healthy controller that answers immediately
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                device_present: true,
                resolve_delay: Duration::ZERO,
                write_delay: Duration::ZERO,
                subscribe_delay: Duration::ZERO,
                pairing: VecDeque::new(),
                services: vec![protocol::SERVICE_UUID],
                characteristics: vec![protocol::DATA_CHAR_UUID, protocol::COMMAND_CHAR_UUID],
                failing_write: None,
                subscribe_error: None,
                resolve_calls: 0,
                pair_calls: 0,
                writes: Vec::new(),
                open_devices: 0,
                next_subscription: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_device_present(&self, present: bool) {
        self.lock().device_present = present;
    }

    pub fn set_resolve_delay(&self, delay: Duration) {
        self.lock().resolve_delay = delay;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = delay;
    }

    /// The descriptor write hangs this long before handlers are registered
    pub fn set_subscribe_delay(&self, delay: Duration) {
        self.lock().subscribe_delay = delay;
    }

    /// Answers for the next pairing requests; once used up the device
    /// reports itself as already paired
    pub fn script_pairing(
        &self,
        outcomes: impl IntoIterator<Item = Result<PairingOutcome, TransportError>>,
    ) {
        self.lock().pairing.extend(outcomes);
    }

    pub fn remove_characteristic(&self, uuid: Uuid) {
        self.lock().characteristics.retain(|c| *c != uuid);
    }

    /// Write number `index` (0-based, counted over the transport's lifetime)
    /// reports `status`
    pub fn fail_write(&self, index: usize, status: WriteStatus) {
        self.lock().failing_write = Some((index, status));
    }

    pub fn fail_subscribe(&self, error: TransportError) {
        self.lock().subscribe_error = Some(error);
    }

    /// Deliver a notification to every live subscription
    pub fn notify(&self, packet: Vec<u8>) {
        for (_, sender) in &self.lock().subscribers {
            let _ = sender.send(TransportEvent::Notification(packet.clone()));
        }
    }

    pub fn simulate_link_loss(&self) {
        for (_, sender) in &self.lock().subscribers {
            let _ = sender.send(TransportEvent::Disconnected);
        }
    }

    pub fn resolve_calls(&self) -> usize {
        self.lock().resolve_calls
    }

    pub fn pair_calls(&self) -> usize {
        self.lock().pair_calls
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn open_devices(&self) -> usize {
        self.lock().open_devices
    }

    pub fn active_subscriptions(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl BleTransport for FakeTransport {
    type Device = FakeDevice;
    type Service = FakeHandle;
    type Characteristic = FakeHandle;
    type Subscription = FakeSubscription;

    fn resolve_device(
        &self,
        address: u64,
    ) -> impl Future<Output = Result<Option<FakeDevice>, TransportError>> + Send {
        let state = self.state.clone();
        async move {
            let delay = {
                let mut state = state.lock().unwrap();
                state.resolve_calls += 1;
                state.resolve_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut state = state.lock().unwrap();
            if !state.device_present {
                return Ok(None);
            }
            state.open_devices += 1;
            Ok(Some(FakeDevice { address }))
        }
    }

    fn pair(
        &self,
        _device: &FakeDevice,
    ) -> impl Future<Output = Result<PairingOutcome, TransportError>> + Send {
        let outcome = {
            let mut state = self.lock();
            state.pair_calls += 1;
            state
                .pairing
                .pop_front()
                .unwrap_or(Ok(PairingOutcome::AlreadyPaired))
        };
        async move { outcome }
    }

    fn services(
        &self,
        _device: &FakeDevice,
    ) -> impl Future<Output = Result<Vec<FakeHandle>, TransportError>> + Send {
        let services = self.lock().services.iter().copied().map(FakeHandle).collect();
        async move { Ok(services) }
    }

    fn characteristics(
        &self,
        _service: &FakeHandle,
    ) -> impl Future<Output = Result<Vec<FakeHandle>, TransportError>> + Send {
        let characteristics = self
            .lock()
            .characteristics
            .iter()
            .copied()
            .map(FakeHandle)
            .collect();
        async move { Ok(characteristics) }
    }

    fn write(
        &self,
        _characteristic: &FakeHandle,
        payload: &[u8],
    ) -> impl Future<Output = Result<WriteStatus, TransportError>> + Send {
        let state = self.state.clone();
        let payload = payload.to_vec();
        async move {
            let (status, delay) = {
                let mut state = state.lock().unwrap();
                let index = state.writes.len();
                state.writes.push(payload);
                let status = match state.failing_write {
                    Some((failing, status)) if failing == index => status,
                    _ => WriteStatus::Success,
                };
                (status, state.write_delay)
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(status)
        }
    }

    fn subscribe(
        &self,
        _device: &FakeDevice,
        _characteristic: &FakeHandle,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> impl Future<Output = Result<FakeSubscription, TransportError>> + Send {
        let state = self.state.clone();
        async move {
            let delay = state.lock().unwrap().subscribe_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut state = state.lock().unwrap();
            if let Some(error) = state.subscribe_error.clone() {
                return Err(error);
            }
            state.next_subscription += 1;
            let id = state.next_subscription;
            state.subscribers.push((id, events));
            Ok(FakeSubscription(id))
        }
    }

    fn unsubscribe(&self, subscription: FakeSubscription) {
        self.lock().subscribers.retain(|(id, _)| *id != subscription.0);
    }

    fn disconnect(&self, _device: FakeDevice) {
        let mut state = self.lock();
        state.open_devices = state.open_devices.saturating_sub(1);
    }
}
