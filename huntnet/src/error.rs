//! Error types for HuntNet.

use thiserror::Error;

use crate::config::ConfigError;
use crate::orchestrator::SessionError;
use crate::registry::RecordError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, HuntNetError>;

#[derive(Error, Debug)]
pub enum HuntNetError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed record: {0}")]
    Record(#[from] RecordError),

    #[error("no node available for class {class:?}")]
    NoNodeAvailable { class: Option<String> },

    #[error("node is shut down")]
    NodeClosed,

    #[error("background task failed: {0}")]
    Task(String),
}

impl HuntNetError {
    pub fn no_node_available(class: Option<&str>) -> Self {
        Self::NoNodeAvailable {
            class: class.map(str::to_string),
        }
    }

    /// The session error behind this one, if any.
    pub fn as_session(&self) -> Option<&SessionError> {
        match self {
            Self::Session(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for HuntNetError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}
