//! Typed error taxonomy shared by providers, queries and mutations.

use tessera_types::{EntityRef, FilterError, PatchError};
use thiserror::Error;

use crate::cache::KeyError;

/// Result type every provider call returns.
pub type ProviderResult<T> = Result<T, DataError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("{entity} not found")]
    NotFound { entity: EntityRef },
    #[error("validation failed: {message}")]
    Validation { message: String },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("`{operation}` timed out")]
    Timeout { operation: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

/// Payload-free discriminant of [`DataError`], used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Network,
    Timeout,
    Unauthorized,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl DataError {
    pub fn not_found(entity: EntityRef) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::NotFound { .. } => ErrorKind::NotFound,
            DataError::Validation { .. } => ErrorKind::Validation,
            DataError::Network { .. } => ErrorKind::Network,
            DataError::Timeout { .. } => ErrorKind::Timeout,
            DataError::Unauthorized { .. } => ErrorKind::Unauthorized,
            DataError::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Only transient transport failures are retried locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataError::Network { .. } | DataError::Timeout { .. })
    }
}

impl From<FilterError> for DataError {
    fn from(err: FilterError) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<PatchError> for DataError {
    fn from(err: PatchError) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<KeyError> for DataError {
    fn from(err: KeyError) -> Self {
        Self::validation(err.to_string())
    }
}
