//! Application layer: wires the link and the input processors into a session.

pub mod session;

pub use session::{Session, SessionCore, SessionError, SessionHandle, SessionOptions};
