//! BLE transport boundary.
//!
//! The connection manager only talks to the OS GATT client through
//! [`BleTransport`]. Notifications and link loss are delivered as
//! [`TransportEvent`]s on a channel handed over at subscription time, so no
//! OS callback ever reaches session state directly.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Anything discovered over GATT that is identified by a UUID
pub trait GattHandle: Clone + Send + Sync + 'static {
    fn uuid(&self) -> Uuid;
}

/// Outcome of a characteristic write as reported by the GATT client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    Unreachable,
    ProtocolError,
    AccessDenied,
}

impl std::fmt::Display for WriteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Unreachable => "unreachable",
            Self::ProtocolError => "protocol error",
            Self::AccessDenied => "access denied",
        };
        f.write_str(name)
    }
}

/// Answer to a pairing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    AlreadyPaired,
    Paired,
    /// The OS declined to pair, which BLE controllers usually do not need
    NotRequired,
    /// Denied, rejected or the prompt was dismissed; worth asking again
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One notification payload, in arrival order
    Notification(Vec<u8>),
    /// The device dropped the link
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("GATT operation failed: {0}")]
    Gatt(String),
    #[error("device is no longer reachable")]
    Unreachable,
}

/// OS level GATT client.
///
/// Handles are cheap clones of OS objects. `unsubscribe` and `disconnect`
/// must be safe to call on handles whose link already dropped.
pub trait BleTransport: Send + Sync + 'static {
    type Device: Clone + Send + Sync + 'static;
    type Service: GattHandle;
    type Characteristic: GattHandle;
    type Subscription: Send + 'static;

    /// `Ok(None)` when no device answers at `address`
    fn resolve_device(
        &self,
        address: u64,
    ) -> impl Future<Output = Result<Option<Self::Device>, TransportError>> + Send;

    /// Ask the OS to pair with `device` unless it already is
    fn pair(
        &self,
        device: &Self::Device,
    ) -> impl Future<Output = Result<PairingOutcome, TransportError>> + Send;

    fn services(
        &self,
        device: &Self::Device,
    ) -> impl Future<Output = Result<Vec<Self::Service>, TransportError>> + Send;

    fn characteristics(
        &self,
        service: &Self::Service,
    ) -> impl Future<Output = Result<Vec<Self::Characteristic>, TransportError>> + Send;

    fn write(
        &self,
        characteristic: &Self::Characteristic,
        payload: &[u8],
    ) -> impl Future<Output = Result<WriteStatus, TransportError>> + Send;

    /// Enable notifications on `characteristic` and start delivering them,
    /// together with link loss on `device`, into `events`.
    ///
    /// Dropping the future before it resolves must leave no handler behind.
    fn subscribe(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> impl Future<Output = Result<Self::Subscription, TransportError>> + Send;

    /// Remove every handler registered by `subscribe`
    fn unsubscribe(&self, subscription: Self::Subscription);

    fn disconnect(&self, device: Self::Device);
}

/// Cancellation signal shared between the control loop and one connect
/// attempt
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in self, so the channel cannot close under us
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(10), token.cancelled())
            .await
            .expect("already cancelled");
    }
}
