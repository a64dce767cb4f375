//! Gear VR Controller session core.
//!
//! Keeps a BLE link to the controller alive, decodes its telemetry and turns
//! touchpad, motion and button input into pointer, scroll, button and
//! gesture events.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::session::{Session, SessionError, SessionHandle, SessionOptions};
pub use domain::models::{ConnectionState, SessionEvent};
pub use domain::settings::{ConfigUpdate, SessionConfig, Settings, SettingsStore};
