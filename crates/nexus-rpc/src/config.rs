//! Configuration for the dispatch engine.
//!
//! [`RpcConfig`] controls where the endpoint is mounted, how large inputs may be, and how
//! errors and responses are logged.
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::{ErrorConfig, RpcConfig};
//!
//! let config = RpcConfig::new()
//!     .with_endpoint("/rpc")
//!     .with_max_input_size(512 * 1024)
//!     .with_error_config(ErrorConfig::production());
//! config.validate()?;
//! ```

use crate::error::ErrorConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default endpoint prefix.
pub const DEFAULT_ENDPOINT: &str = "/api";

/// Default key of the in-process caller in the event's locals.
pub const DEFAULT_LOCALS_KEY: &str = "api";

/// Default maximum request body size: 1MB.
pub const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigValidationError {
    /// max_input_size must be greater than 0
    InvalidMaxInputSize,
    /// endpoint must start with '/' and must not end with '/'
    InvalidEndpoint(String),
    /// locals_key must not be empty
    InvalidLocalsKey,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMaxInputSize => {
                write!(f, "max_input_size must be greater than 0")
            }
            Self::InvalidEndpoint(endpoint) => {
                write!(
                    f,
                    "endpoint must start with '/' and must not end with '/' (got: '{}')",
                    endpoint
                )
            }
            Self::InvalidLocalsKey => {
                write!(f, "locals_key must not be empty")
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Dispatch engine configuration.
///
/// # Fields
///
/// * `endpoint` - Path prefix served by the engine. Requests outside it are passed to the
///   host's `resolve`. `None` disables HTTP dispatch. Default: `/api`.
///
/// * `locals_key` - Key under which the in-process [`Caller`](crate::server::Caller) is
///   installed in each event's locals. `None` disables it. Default: `api`.
///
/// * `max_input_size` - Maximum request body in bytes; larger bodies fail with
///   `PAYLOAD_TOO_LARGE`. Default: 1MB.
///
/// * `error_config` - Development or production error rendering. Default: development in
///   debug builds.
///
/// * `debug_logging` - Log every response status at `debug` instead of `trace`.
///   Default: false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub endpoint: Option<String>,
    pub locals_key: Option<String>,
    pub max_input_size: usize,
    pub error_config: ErrorConfig,
    pub debug_logging: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: Some(DEFAULT_ENDPOINT.to_string()),
            locals_key: Some(DEFAULT_LOCALS_KEY.to_string()),
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            error_config: ErrorConfig::default(),
            debug_logging: false,
        }
    }
}

impl RpcConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return an error if invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_input_size` is 0
    /// - `endpoint` does not start with `/`, or ends with `/`
    /// - `locals_key` is empty
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_input_size == 0 {
            return Err(ConfigValidationError::InvalidMaxInputSize);
        }
        if let Some(endpoint) = &self.endpoint
            && (!endpoint.starts_with('/') || endpoint.ends_with('/'))
        {
            return Err(ConfigValidationError::InvalidEndpoint(endpoint.clone()));
        }
        if self.locals_key.as_deref() == Some("") {
            return Err(ConfigValidationError::InvalidLocalsKey);
        }
        Ok(())
    }

    /// Serve the endpoint under `endpoint`.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Do not serve HTTP; only the in-process caller stays available.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn without_endpoint(mut self) -> Self {
        self.endpoint = None;
        self
    }

    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_locals_key(mut self, key: impl Into<String>) -> Self {
        self.locals_key = Some(key.into());
        self
    }

    /// Do not install the in-process caller.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn without_locals_key(mut self) -> Self {
        self.locals_key = None;
        self
    }

    /// Set the maximum input size in bytes.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = size;
        self
    }

    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Enable or disable debug logging.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }
}
