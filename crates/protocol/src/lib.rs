//! Wire protocol shared between the usbmon daemon and its socket clients.
//!
//! The daemon talks to a single logical client (a browser extension) over a
//! loopback TCP socket. Both directions carry UTF-8 text lines: the client
//! sends tab-separated commands, the daemon answers with one JSON object per
//! line. This crate defines the command parser, the reply model with its
//! exact JSON shape, the line framing buffer, and the shared device types.
//!
//! # Example
//!
//! ```
//! use protocol::{Command, Reply, PROTOCOL_VERSION};
//!
//! let cmd = Command::parse("install\tUSB\\VID_19D2&PID_1350\\FULL_UNAGI\tC:\\drivers").unwrap();
//! assert!(matches!(cmd, Command::Install { .. }));
//!
//! let reply = Reply::Info {
//!     application: "usbmond".to_string(),
//!     version: PROTOCOL_VERSION,
//! };
//! let line = reply.to_line().unwrap();
//! assert!(line.starts_with("{\"type\":\"info\""));
//! ```

pub mod codec;
pub mod command;
pub mod error;
pub mod messages;
pub mod types;

pub use codec::{BELL, LineBuffer, MAX_LINE_LEN, normalize_newlines};
pub use command::Command;
pub use error::{ParseError, Result};
pub use messages::{DeviceState, DeviceStateEntry, Reply};
pub use types::{
    DeviceEventKind, DeviceRecord, DriverRule, InstallErrorName, InstallMechanism, InstallOutcome,
    InstallState,
};

/// Protocol revision reported by the `info` command.
///
/// Bumped whenever the wire format changes in a way the extension must
/// detect.
pub const PROTOCOL_VERSION: u32 = 1;
