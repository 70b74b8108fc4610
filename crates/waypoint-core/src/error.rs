//! Error types for Waypoint Core

use thiserror::Error;

/// Result type alias using Waypoint Error
pub type Result<T> = std::result::Result<T, Error>;

/// Waypoint error types
///
/// Most of these never escape the session manager: collaborator failures are
/// absorbed and logged there. They surface from the stores, the config layer
/// and the CLI.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
