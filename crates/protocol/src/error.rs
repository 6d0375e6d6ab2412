//! Protocol error types

use thiserror::Error;

/// Errors raised while parsing client commands or encoding replies.
///
/// These are protocol-level errors: the daemon reports them back to the
/// client as an `error` reply and keeps the connection open.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Command name not recognized
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Command is missing a required parameter
    #[error("command {command} requires a {missing} parameter")]
    MissingParameter {
        command: &'static str,
        missing: &'static str,
    },

    /// A reply could not be serialized to JSON
    #[error("failed to encode reply: {0}")]
    Encode(String),
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ParseError>;
