//! Common error types

use crate::worker::WorkerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("USB bus error: {0}")]
    Bus(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Unknown device: {0}")]
    DeviceNotFound(String),

    #[error("A driver installation is already in progress")]
    InstallerBusy,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
