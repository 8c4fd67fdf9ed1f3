use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum SyncTreeError {
    #[error("Event channel error: {0}")]
    Channel(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Remote host error: {0}")]
    Host(String),
    #[error("Invalid resource key: {0}")]
    InvalidKey(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl SyncTreeError {
    pub fn host(msg: impl Into<String>) -> Self {
        SyncTreeError::Host(msg.into())
    }

    /// The bare message, without the variant prefix. Used where an error is converted into
    /// per-node result data.
    pub fn message(&self) -> String {
        match self {
            SyncTreeError::Channel(m)
            | SyncTreeError::Config(m)
            | SyncTreeError::Host(m)
            | SyncTreeError::InvalidKey(m)
            | SyncTreeError::Io(m)
            | SyncTreeError::NotFound(m)
            | SyncTreeError::Serialization(m) => m.clone(),
        }
    }
}

impl From<toml::de::Error> for SyncTreeError {
    fn from(src: toml::de::Error) -> SyncTreeError {
        SyncTreeError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for SyncTreeError {
    fn from(src: toml::ser::Error) -> SyncTreeError {
        SyncTreeError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<serde_json::Error> for SyncTreeError {
    fn from(src: serde_json::Error) -> SyncTreeError {
        SyncTreeError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<uuid::Error> for SyncTreeError {
    fn from(src: uuid::Error) -> SyncTreeError {
        SyncTreeError::InvalidKey(format!("not a GUID: {src}"))
    }
}

impl From<io::Error> for SyncTreeError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => SyncTreeError::NotFound(format!("{x}")),
            _ => SyncTreeError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<TokioSendError<Event>> for SyncTreeError {
    fn from(x: TokioSendError<Event>) -> Self {
        SyncTreeError::Channel(format!(
            "Channel update send Error, could not transmit event {}",
            x.0
        ))
    }
}
