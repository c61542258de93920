//! Shared error types across dmpolicy crates.

use thiserror::Error;

/// Stable error codes (logs, metrics labels, ops responses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid or inconsistent configuration.
    BadConfig,
    /// Unsupported config version.
    UnsupportedVersion,
    /// Persistent cache could not be read or written.
    CacheFailure,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadConfig => "BAD_CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::CacheFailure => "CACHE_FAILURE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, DmPolicyError>;

/// Unified error type used by core and client.
#[derive(Debug, Error)]
pub enum DmPolicyError {
    #[error("bad config: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("cache: {0}")]
    Cache(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl DmPolicyError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            DmPolicyError::Config(_) => ErrorCode::BadConfig,
            DmPolicyError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            DmPolicyError::Cache(_) => ErrorCode::CacheFailure,
            DmPolicyError::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Errors reported by the management backend for a register or policy request.
///
/// These are never surfaced to policy consumers; the fetch orchestrator
/// recovers from them by retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The request could not be sent (no network, DNS, connect failure).
    #[error("network unavailable")]
    NetworkUnavailable,
    /// The service answered with an unexpected HTTP status.
    #[error("server error (status {0})")]
    ServerError(u16),
    /// The response body could not be decoded.
    #[error("response decoding failed")]
    ResponseDecoding,
    /// The requested resource does not exist.
    #[error("not found")]
    NotFound,
    /// The caller is not allowed to perform the request.
    #[error("forbidden")]
    Forbidden,
    /// The service no longer knows the registered device.
    #[error("device not found")]
    DeviceNotFound,
    /// The registration credential was rejected.
    #[error("device token invalid")]
    TokenInvalid,
    /// The account is not subject to management.
    #[error("management not supported")]
    ManagementNotSupported,
}

impl BackendError {
    /// Stable code for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendError::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            BackendError::ServerError(_) => "SERVER_ERROR",
            BackendError::ResponseDecoding => "RESPONSE_DECODING",
            BackendError::NotFound => "NOT_FOUND",
            BackendError::Forbidden => "FORBIDDEN",
            BackendError::DeviceNotFound => "DEVICE_NOT_FOUND",
            BackendError::TokenInvalid => "TOKEN_INVALID",
            BackendError::ManagementNotSupported => "MANAGEMENT_NOT_SUPPORTED",
        }
    }

    /// The client is not managed; stop talking to the service.
    pub fn is_not_managed(self) -> bool {
        matches!(self, BackendError::ManagementNotSupported)
    }

    /// The held registration credential is no longer usable.
    pub fn invalidates_registration(self) -> bool {
        matches!(self, BackendError::DeviceNotFound | BackendError::TokenInvalid)
    }
}
