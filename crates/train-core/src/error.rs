//! Error taxonomy for the release train.

use thiserror::Error;

/// Errors returned by the hosting-platform API capability.
#[derive(Debug, Clone, Error)]
#[error("github api error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct ApiError {
    /// HTTP status of the failed call, when the transport got that far.
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// True when the call failed with exactly `status`.
    pub fn is_status(&self, status: u16) -> bool {
        self.status == Some(status)
    }
}

/// Errors raised while building the manager registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("manager name must be a non-empty string")]
    EmptyName,

    #[error("manager \"{name}\" must be backed by a named handler")]
    UnnamedHandler { name: String },

    #[error("manager \"{name}\" is backed by handler \"{handler}\"; names must match")]
    NameMismatch { name: String, handler: String },

    #[error("manager \"{name}\" must accept one or more event shapes")]
    NoShapes { name: String },

    #[error("manager \"{name}\" lists event shape \"{shape}\" more than once")]
    DuplicateShape { name: String, shape: String },

    #[error("manager \"{name}\" is registered more than once")]
    DuplicateManager { name: String },
}

/// A manager returned a result that breaks the result contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("manager \"{expected}\" returned a result labelled \"{actual}\"")]
    ManagerMismatch { expected: String, actual: String },

    #[error("manager \"{manager}\" returned unrecognised status code {code}")]
    UnknownStatusCode { manager: String, code: u16 },

    #[error("manager \"{manager}\" returned an empty \"{channel}\" notification")]
    EmptyNotification { manager: String, channel: String },
}

/// Errors produced by a notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("notification rejected by {channel}: {reason}")]
    Rejected { channel: String, reason: String },
}

/// Errors produced by a message queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message {id} not found or receipt expired")]
    UnknownMessage { id: String },

    #[error("queue io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for release train operations.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("manager result contract violated: {0}")]
    Contract(#[from] ContractViolation),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("'{0}' is not a valid git ref")]
    InvalidRef(String),

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("comparison error: {0}")]
    Comparison(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("tag error: {0}")]
    Tag(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for release train operations.
pub type Result<T> = std::result::Result<T, TrainError>;
