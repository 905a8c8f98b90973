//! Error types for RPC operations
//!
//! Every failure that crosses the dispatch boundary is an [`RpcError`] carrying one of the
//! HTTP-style kinds in [`RpcErrorCode`]. The kind decides the response status and the default
//! message; handlers may raise any kind with an optional custom message.
//!
//! # Error Codes
//!
//! Codes serialize as SCREAMING_SNAKE_CASE strings (`NotFound` becomes `"NOT_FOUND"`), and the
//! code → status mapping is a constant `match`, so there is no global table to initialize.
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::{RpcError, RpcErrorCode};
//!
//! let error = RpcError::new(RpcErrorCode::NotFound, "User not found");
//! let error = RpcError::not_found("User not found"); // Convenience method
//! let error = RpcError::from_code(RpcErrorCode::TooManyRequests); // Default message
//! ```

use crate::validation::Issue;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Named error kinds, each mapped to an HTTP status code and a default message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorCode {
    // Client errors (4xx)
    /// The request was malformed or its input failed validation
    BadRequest,
    /// Authentication is required
    Unauthorized,
    /// The authenticated caller lacks permission
    Forbidden,
    /// The procedure or resource does not exist
    NotFound,
    /// The HTTP method is not accepted by the endpoint
    MethodNotSupported,
    /// The operation took too long
    Timeout,
    /// The request conflicts with current state
    Conflict,
    /// A precondition of the request was not met
    PreconditionFailed,
    /// The request payload exceeds the configured size limit
    PayloadTooLarge,
    /// The request body has a content type the endpoint cannot decode
    UnsupportedMediaType,
    /// The request was well-formed but semantically unprocessable
    UnprocessableContent,
    /// The caller has sent too many requests
    TooManyRequests,
    /// The client went away before the response was produced
    ClientClosedRequest,

    // Server errors (5xx)
    /// An unexpected internal error occurred
    InternalServerError,
    /// The requested functionality is not implemented
    NotImplemented,
    /// An upstream dependency answered with an invalid response
    BadGateway,
    /// The service is temporarily unavailable
    ServiceUnavailable,
    /// An upstream dependency timed out
    GatewayTimeout,
}

impl RpcErrorCode {
    /// Every error kind, in status order.
    pub const ALL: [RpcErrorCode; 18] = [
        Self::BadRequest,
        Self::Unauthorized,
        Self::Forbidden,
        Self::NotFound,
        Self::MethodNotSupported,
        Self::Timeout,
        Self::Conflict,
        Self::PreconditionFailed,
        Self::PayloadTooLarge,
        Self::UnsupportedMediaType,
        Self::UnprocessableContent,
        Self::TooManyRequests,
        Self::ClientClosedRequest,
        Self::InternalServerError,
        Self::NotImplemented,
        Self::BadGateway,
        Self::ServiceUnavailable,
        Self::GatewayTimeout,
    ];

    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            Self::Timeout => "TIMEOUT",
            Self::Conflict => "CONFLICT",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            Self::UnprocessableContent => "UNPROCESSABLE_CONTENT",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::ClientClosedRequest => "CLIENT_CLOSED_REQUEST",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::BadGateway => "BAD_GATEWAY",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::GatewayTimeout => "GATEWAY_TIMEOUT",
        }
    }

    /// HTTP status code for this kind.
    pub const fn status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotSupported => 405,
            Self::Timeout => 408,
            Self::Conflict => 409,
            Self::PreconditionFailed => 412,
            Self::PayloadTooLarge => 413,
            Self::UnsupportedMediaType => 415,
            Self::UnprocessableContent => 422,
            Self::TooManyRequests => 429,
            Self::ClientClosedRequest => 499,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
            Self::BadGateway => 502,
            Self::ServiceUnavailable => 503,
            Self::GatewayTimeout => 504,
        }
    }

    /// Default human-readable message, also used as the HTTP reason phrase.
    pub const fn default_message(&self) -> &'static str {
        match self {
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotSupported => "Method Not Supported",
            Self::Timeout => "Timeout",
            Self::Conflict => "Conflict",
            Self::PreconditionFailed => "Precondition Failed",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::UnprocessableContent => "Unprocessable Content",
            Self::TooManyRequests => "Too Many Requests",
            Self::ClientClosedRequest => "Client Closed Request",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
        }
    }

    /// Looks up the kind for an HTTP status code.
    pub fn from_status(status: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.status() == status)
    }

    /// Returns true if this is a client error (4xx).
    pub const fn is_client_error(&self) -> bool {
        self.status() < 500
    }

    /// Returns true if this is a server error (5xx).
    pub const fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RPC error with a typed kind, a message and optional validation issues.
///
/// # Example
/// ```rust,ignore
/// use nexus_rpc::{RpcError, RpcErrorCode};
///
/// let error = RpcError::new(RpcErrorCode::Conflict, "User already exists")
///     .with_cause("unique constraint users_email_key");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct RpcError {
    /// Error kind
    pub code: RpcErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Validation issues, present for rejected input
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    /// Internal cause for debugging (never sent in production mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl RpcError {
    /// Create a new error with code and message.
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            issues: Vec::new(),
            cause: None,
        }
    }

    /// Create an error with the kind's default message.
    pub fn from_code(code: RpcErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Attach validation issues.
    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    /// Add a cause string for debugging.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        self.code.status()
    }

    /// Prepare the error for a client response according to `config`.
    ///
    /// Production mode strips the cause, and server errors that carry one (uncaught
    /// failures) get the kind's default message instead of the internal one.
    pub fn apply_config(mut self, config: &ErrorConfig) -> Self {
        if config.development_mode {
            return self;
        }
        if self.code.is_server_error() && self.cause.is_some() {
            self.message = self.code.default_message().to_string();
        }
        self.cause = None;
        self
    }

    /// Body sent to the client: `{"error": message, "issues": [...]}`.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.message.clone(),
            issues: self.issues.clone(),
            cause: self.cause.clone(),
        }
    }

    // Convenience constructors

    /// Create a BAD_REQUEST error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::BadRequest, message)
    }

    /// Create the BAD_REQUEST error raised for rejected input.
    pub fn invalid_input(issues: Vec<Issue>) -> Self {
        let message = match issues.as_slice() {
            [only] => only.to_string(),
            _ => format!("Input validation failed with {} issues", issues.len()),
        };
        Self::bad_request(message).with_issues(issues)
    }

    /// Create an UNAUTHORIZED error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Unauthorized, message)
    }

    /// Create a FORBIDDEN error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Forbidden, message)
    }

    /// Create a NOT_FOUND error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::NotFound, message)
    }

    /// Create the NOT_FOUND error for an unresolvable procedure path.
    pub fn procedure_not_found(path: &str) -> Self {
        Self::not_found(format!("Procedure '{}' not found", path))
    }

    /// Create a METHOD_NOT_SUPPORTED error.
    pub fn method_not_supported(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::MethodNotSupported, message)
    }

    /// Create a CONFLICT error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Conflict, message)
    }

    /// Create a PAYLOAD_TOO_LARGE error.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::PayloadTooLarge, message)
    }

    /// Create an UNSUPPORTED_MEDIA_TYPE error.
    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::UnsupportedMediaType, message)
    }

    /// Create an INTERNAL_SERVER_ERROR error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InternalServerError, message)
    }

    /// Create the error reported when a value cannot be put on the wire.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::internal(format!("Serialization failed: {}", message.into()))
    }

    /// Create a NOT_IMPLEMENTED error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::NotImplemented, message)
    }

    /// Create a SERVICE_UNAVAILABLE error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ServiceUnavailable, message)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {}", err))
    }
}

impl From<crate::codec::CodecError> for RpcError {
    fn from(err: crate::codec::CodecError) -> Self {
        if err.is_unencodable() {
            Self::serialization(err.to_string())
        } else {
            Self::bad_request(err.to_string())
        }
    }
}

impl From<multer::Error> for RpcError {
    fn from(err: multer::Error) -> Self {
        Self::bad_request(format!("Multipart error: {}", err))
    }
}

impl From<http::Error> for RpcError {
    fn from(err: http::Error) -> Self {
        Self::internal(format!("HTTP error: {}", err))
    }
}

/// Raise an error of the given kind, with the kind's default message unless one is given.
///
/// ```rust,ignore
/// return Err(error(RpcErrorCode::Forbidden, None));
/// ```
pub fn error(code: RpcErrorCode, message: Option<&str>) -> RpcError {
    match message {
        Some(message) => RpcError::new(code, message),
        None => RpcError::from_code(code),
    }
}

/// Result type alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// JSON body of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error message
    pub error: String,
    /// Validation issues, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    /// Debug cause (development mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

// =============================================================================
// Error Configuration
// =============================================================================

/// Configuration for error handling behavior.
///
/// # Example
/// ```rust,ignore
/// use nexus_rpc::ErrorConfig;
///
/// // Development mode - include causes of uncaught failures
/// let dev_config = ErrorConfig::development();
///
/// // Production mode - sanitize errors
/// let prod_config = ErrorConfig::production();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorConfig {
    /// Whether to include development-only information (causes, panic messages)
    pub development_mode: bool,
}

impl ErrorConfig {
    /// Create a new error configuration (development mode in debug builds).
    pub fn new() -> Self {
        Self {
            development_mode: cfg!(debug_assertions),
        }
    }

    /// Create a development mode configuration.
    pub fn development() -> Self {
        Self {
            development_mode: true,
        }
    }

    /// Create a production mode configuration.
    pub fn production() -> Self {
        Self {
            development_mode: false,
        }
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn error_code_strategy() -> impl Strategy<Value = RpcErrorCode> {
        (0..RpcErrorCode::ALL.len()).prop_map(|i| RpcErrorCode::ALL[i])
    }

    proptest! {
        /// A code is never both a client and a server error
        #[test]
        fn prop_error_code_classification_consistent(code in error_code_strategy()) {
            prop_assert!(code.is_client_error() != code.is_server_error());
        }

        /// Client errors keep their message in production mode
        #[test]
        fn prop_production_mode_keeps_client_messages(
            code in error_code_strategy(),
            message in "[a-zA-Z0-9 ]{1,50}",
        ) {
            let result = RpcError::new(code, message.clone())
                .with_cause("cause")
                .apply_config(&ErrorConfig::production());
            prop_assert!(result.cause.is_none());
            if code.is_client_error() {
                prop_assert_eq!(result.message, message);
            } else {
                prop_assert_eq!(result.message, code.default_message());
            }
        }
    }
}
