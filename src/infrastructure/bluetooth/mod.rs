//! Bluetooth Module
//!
//! BLE link to the Gear VR Controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                      │
//! │   (control task - connect, setup, reconnect, cancel)     │
//! └──────────────┬────────────────────────────┬─────────────┘
//!                │                            │
//!                ▼                            ▼
//!        ┌──────────────┐             ┌──────────────┐
//!        │ BleTransport │             │   Protocol   │
//!        │              │             │              │
//!        │ - WinRT GATT │             │ - UUIDs      │
//!        │ - events     │             │ - Commands   │
//!        │   channel    │             │ - Decoding   │
//!        └──────────────┘             └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Controller protocol definitions, commands, and packet decoding
//! - [`transport`] - The GATT client seam and cancellation token
//! - [`connection`] - Connection state machine with bounded reconnection
//! - `winrt` - Windows implementation of the transport

pub mod connection;
pub mod protocol;
pub mod transport;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub mod fake;

pub use connection::{ConnectError, ConnectionConfig, ConnectionManager};
pub use transport::{BleTransport, PairingOutcome, TransportEvent};
