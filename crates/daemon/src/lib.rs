//! Daemon internals for usbmon
//!
//! The `usbmond` binary wires these modules together:
//! - [`bus`]: device-tree enumeration and hotplug signals
//! - [`monitor`]: support filtering, install-state derivation, snapshots
//! - [`debounce`]: arrival coalescing
//! - [`catalog`]: driver rules keyed by instance and hardware IDs
//! - [`installer`]: out-of-process driver installation
//! - [`net`]: the loopback client socket
//! - [`control`]: the single task that owns all mutable state
//!
//! Everything lives in a library so integration tests can assemble a full
//! daemon around a scripted device bus.

pub mod bus;
pub mod catalog;
pub mod config;
pub mod control;
pub mod debounce;
pub mod installer;
pub mod monitor;
pub mod net;
