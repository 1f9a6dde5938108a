//! Unified error handling for the trail-map library.
//!
//! Most map failures are deliberately local: a missing capability disables a
//! feature, a malformed URL parameter is dropped. The variants here cover the
//! cases that *do* need to surface to the caller (lifecycle misuse, provider
//! construction, item fetching).

use thiserror::Error;

/// Unified error type for trail-map operations.
#[derive(Debug, Error)]
pub enum MapError {
    /// An operation required an initialized map.
    #[error("map is not initialized")]
    NotInitialized,

    /// `initialize` was called twice on the same controller.
    #[error("map is already initialized")]
    AlreadyInitialized,

    /// The map canvas element could not be found.
    #[error("map canvas '{id}' not found")]
    CanvasNotFound { id: String },

    /// The map provider SDK reported a failure.
    #[error("map provider error: {message}")]
    Provider { message: String },

    /// An item fetch failed.
    #[error("fetch error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Fetch {
        message: String,
        status: Option<u16>,
    },

    /// A parameter failed validation.
    #[error("invalid parameter '{name}': {value}")]
    InvalidParameter { name: String, value: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl MapError {
    /// Shorthand for a provider error from any displayable cause.
    pub fn provider(message: impl std::fmt::Display) -> Self {
        MapError::Provider {
            message: message.to_string(),
        }
    }

    /// Shorthand for a fetch error without a status code.
    pub fn fetch(message: impl std::fmt::Display) -> Self {
        MapError::Fetch {
            message: message.to_string(),
            status: None,
        }
    }
}

/// Result type alias for trail-map operations.
pub type Result<T> = std::result::Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MapError::CanvasNotFound {
            id: "map-canvas".to_string(),
        };
        assert!(err.to_string().contains("map-canvas"));

        let err = MapError::Fetch {
            message: "timed out".to_string(),
            status: Some(504),
        };
        assert!(err.to_string().contains("504"));
        assert!(err.to_string().contains("timed out"));
    }
}
