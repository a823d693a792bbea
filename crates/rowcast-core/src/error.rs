//! Error types for rowcast core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Only [`SourceError::RowRead`] is recoverable; everything else that reaches
//! the publisher loop ends the run.

use thiserror::Error;

/// Result type alias for rowcast operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for rowcast.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data source error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Event sink error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Row could not be encoded as JSON
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the publisher may skip the failing unit of work and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Source(SourceError::RowRead(_)))
    }
}

/// Data source errors.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Failed to connect to the data source
    #[error("Connection failed to {target}: {message}")]
    ConnectionFailed { target: String, message: String },

    /// The source refused or failed to execute the query
    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    /// A single row could not be read
    #[error("Row read failed: {0}")]
    RowRead(String),

    /// The stream was used after the connection closed
    #[error("Stream closed")]
    StreamClosed,
}

/// Event sink transport errors.
///
/// A response from the sink, positive or negative, is never a `SinkError`;
/// these only describe the absence of a response.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The request could not be sent or no response arrived
    #[error("Transport failure to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The per-attempt request timeout elapsed
    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// The HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(String),
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("missing query".into());
        assert_eq!(err.to_string(), "Configuration error: missing query");

        let source_err = SourceError::ConnectionFailed {
            target: "localhost:5432".into(),
            message: "connection refused".into(),
        };
        assert_eq!(
            source_err.to_string(),
            "Connection failed to localhost:5432: connection refused"
        );

        let sink_err = SinkError::Timeout {
            endpoint: "http://localhost:8080/".into(),
        };
        assert_eq!(
            sink_err.to_string(),
            "Request to http://localhost:8080/ timed out"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = SourceError::QueryExecution("syntax error".into()).into();
        assert!(matches!(
            err,
            Error::Source(SourceError::QueryExecution(_))
        ));
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_only_row_read_is_recoverable() {
        assert!(Error::from(SourceError::RowRead("bad column".into())).is_recoverable());
        assert!(!Error::from(SourceError::QueryExecution("denied".into())).is_recoverable());
        assert!(!Error::Serialization("NaN".into()).is_recoverable());
        assert!(!Error::Config("missing".into()).is_recoverable());
    }

    #[test]
    fn test_toml_error_is_config() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("not = [valid");
        let err: Error = parsed.unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
