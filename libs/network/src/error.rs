//! Network Error Types
//!
//! Error handling for endpoint resolution, connection hand-off, topology
//! decode and plugin configuration failures.
//!
//! Connection attempts that fail transiently never surface here: the
//! connector retries them silently. Only failures the invoking layer must
//! act on are represented.

use thiserror::Error;

/// Main network error type
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Endpoint name could not be resolved to a socket address
    #[error("Resolution error: cannot resolve '{endpoint}': {message}")]
    Resolution { endpoint: String, message: String },

    /// Protocol handler factory failed after a socket was opened
    #[error("Handler construction failed for '{endpoint}': {message}")]
    HandlerConstruction {
        endpoint: String,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Structured payload lacks a mandatory entry
    #[error("Required field '{field}' is missing")]
    RequiredFieldMissing { field: String },

    /// Payload decode and encode errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Operation attempted on a closed resource
    #[error("{resource} is closed")]
    Closed { resource: String },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    /// Create a resolution error
    pub fn resolution(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Wrap a factory failure with the endpoint it was building a handler for
    pub fn handler_construction(endpoint: impl Into<String>, cause: NetworkError) -> Self {
        Self::HandlerConstruction {
            endpoint: endpoint.into(),
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create a missing-field error
    pub fn required_field_missing(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing {
            field: field.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error with source
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a closed-resource error
    pub fn closed(resource: impl Into<String>) -> Self {
        Self::Closed {
            resource: resource.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            NetworkError::Resolution { .. } => "resolution",
            NetworkError::HandlerConstruction { .. } => "handler_construction",
            NetworkError::RequiredFieldMissing { .. } => "required_field_missing",
            NetworkError::Protocol { .. } => "protocol",
            NetworkError::Configuration { .. } => "configuration",
            NetworkError::Closed { .. } => "closed",
            NetworkError::Io { .. } => "io",
        }
    }
}

/// Convert standard I/O errors to network errors
impl From<std::io::Error> for NetworkError {
    fn from(error: std::io::Error) -> Self {
        NetworkError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

/// Convert serde YAML errors to network errors
impl From<serde_yaml::Error> for NetworkError {
    fn from(error: serde_yaml::Error) -> Self {
        NetworkError::protocol_with_source(format!("YAML payload error: {}", error), error)
    }
}
