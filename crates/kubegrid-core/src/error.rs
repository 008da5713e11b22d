//! Error types for KubeGrid discovery

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for discovery
#[derive(Error, Debug)]
pub enum DiscoveryError {
    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid value {value:?} for property '{key}': {reason}")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String,
    },

    // Credential errors
    #[error("could not read token file {path:?}: {source}")]
    Credential {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bearer token: {0}")]
    InvalidCredential(String),

    // Backing source errors
    #[error("backing source unavailable: {0}")]
    BackingSource(String),

    // Lifecycle errors
    #[error("discovery strategy already destroyed")]
    Destroyed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Errors the membership engine may retry on its next discovery round
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::BackingSource(_) | Self::Io(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InvalidProperty { .. }
        )
    }
}

/// Result type alias for discovery
pub type Result<T> = std::result::Result<T, DiscoveryError>;
