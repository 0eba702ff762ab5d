//! Error types for client construction

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// A required credential is missing from the configuration
    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
