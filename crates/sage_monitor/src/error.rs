//! Channel errors. Transient by nature: a failed discovery is logged and the
//! cycle moves on.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChannelError>;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Cannot connect to {channel} at {host}: {message}")]
    Connect {
        channel: &'static str,
        host: String,
        message: String,
    },

    #[error("Authentication failed for {user}@{host}: {message}")]
    Auth {
        host: String,
        user: String,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Invalid channel configuration: {0}")]
    Config(String),

    #[error("Processed-file ledger unavailable: {0}")]
    Ledger(String),
}

impl ChannelError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn protocol(message: impl ToString) -> Self {
        Self::Protocol(message.to_string())
    }
}
