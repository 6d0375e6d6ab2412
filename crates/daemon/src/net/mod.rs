//! Extension socket
//!
//! Loopback TCP endpoint the browser extension connects to. The service
//! only moves bytes: inbound data is framed into lines and handed to the
//! control loop over a channel, outbound replies and pings are written on
//! request. Command interpretation lives in [`crate::control`].

pub mod service;

pub use service::{ClientLine, SocketService};
