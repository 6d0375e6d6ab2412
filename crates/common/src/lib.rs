//! Common utilities for usbmon
//!
//! This crate provides functionality shared across the daemon components:
//! error handling, logging setup, the blocking task worker that backs the
//! device poller and the driver installer, and test fixtures.

pub mod error;
pub mod logging;
pub mod test_utils;
pub mod worker;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use worker::{
    Task, TaskState, TaskTicket, TaskWorker, WorkerContext, WorkerError, WorkerOptions,
    WorkerState,
};
