use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the hookrelay delivery service
#[derive(Debug)]
pub enum RelayError {
    /// Configuration, CLI argument or destination entry errors
    Config(String),

    /// Network-level delivery failure (connection refused, DNS, timeout)
    Transport(String),

    /// Destination answered with a non-success HTTP status
    Status(u16),

    /// The dispatcher loop is gone or dropped a reply
    Dispatcher(String),

    /// API/HTTP request errors
    Api(String),

    /// System I/O errors
    Io(std::io::Error),

    /// JSON serialization/deserialization errors
    Serialization(serde_json::Error),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RelayError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RelayError::Status(code) => write!(f, "Webhook responded with status {}", code),
            RelayError::Dispatcher(msg) => write!(f, "Dispatcher error: {}", msg),
            RelayError::Api(msg) => write!(f, "API error: {}", msg),
            RelayError::Io(err) => write!(f, "I/O error: {}", err),
            RelayError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Io(err) => Some(err),
            RelayError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Config(_) => StatusCode::BAD_REQUEST,
            RelayError::Transport(_) => StatusCode::BAD_GATEWAY,
            RelayError::Status(_) => StatusCode::BAD_GATEWAY,
            RelayError::Dispatcher(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Api(_) => StatusCode::BAD_REQUEST,
            RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Serialization(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "configuration_error",
            RelayError::Transport(_) => "transport_error",
            RelayError::Status(_) => "status_error",
            RelayError::Dispatcher(_) => "dispatcher_error",
            RelayError::Api(_) => "api_error",
            RelayError::Io(_) => "io_error",
            RelayError::Serialization(_) => "serialization_error",
        }
    }

    /// Transport failures back off longer than status failures
    pub fn is_transport(&self) -> bool {
        matches!(self, RelayError::Transport(_))
    }
}

// Axum IntoResponse implementation for HTTP error responses
impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

// Conversions from common error types
impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io(err)
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err)
    }
}

impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::Config(format!("Invalid URL: {}", err))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RelayError::Status(status.as_u16()),
            None => RelayError::Transport(err.to_string()),
        }
    }
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::RelayError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RelayError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! dispatcher_error {
    ($msg:expr) => {
        $crate::error::RelayError::Dispatcher($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RelayError::Dispatcher(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! api_error {
    ($msg:expr) => {
        $crate::error::RelayError::Api($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RelayError::Api(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_err = RelayError::Config("Invalid port".to_string());
        assert_eq!(config_err.to_string(), "Configuration error: Invalid port");

        let status_err = RelayError::Status(500);
        assert_eq!(status_err.to_string(), "Webhook responded with status 500");

        let io_err = RelayError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert!(io_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let relay_err: RelayError = io_err.into();
        assert!(matches!(relay_err, RelayError::Io(_)));

        let url_err: RelayError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(url_err, RelayError::Config(_)));
    }

    #[test]
    fn test_transport_classification() {
        assert!(RelayError::Transport("refused".into()).is_transport());
        assert!(!RelayError::Status(503).is_transport());
    }

    #[test]
    fn test_macros() {
        let err = config_error!("Rate limit {} is invalid", -1);
        assert_eq!(err.to_string(), "Configuration error: Rate limit -1 is invalid");

        let err = dispatcher_error!("loop closed");
        assert_eq!(err.to_string(), "Dispatcher error: loop closed");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
