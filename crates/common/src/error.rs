//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid device selector '{input}': {reason}")]
    InvalidSelector { input: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
