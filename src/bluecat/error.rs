//! Error types for the IPAM client.

use thiserror::Error;

use crate::config::ConfigError;
use crate::rpc::TransportError;

/// Errors raised by the IPAM session and allocator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IpamError {
    /// Raised when login is rejected or never reaches the service. The
    /// workflow maps this to a retry-later outcome; it is never retried
    /// in-process.
    #[error("IPAM login failed: {message}")]
    Auth {
        /// Description of the failure, including the HTTP status when one
        /// was received.
        message: String,
    },
    /// Raised when a call returns a non-2xx HTTP status.
    #[error("IPAM call {op} failed with HTTP status {status}")]
    Transport {
        /// Operation that failed.
        op: &'static str,
        /// HTTP status returned by the endpoint.
        status: u16,
    },
    /// Raised when the connection itself fails.
    #[error(transparent)]
    Connection(#[from] TransportError),
    /// Raised when an expected entity or property is absent.
    #[error("{what} not found in IPAM")]
    NotFound {
        /// Description of the missing entity or property.
        what: String,
    },
    /// Raised when a requested hostname is already registered.
    #[error("hostname {hostname} appears to be in use")]
    NameConflict {
        /// The conflicting hostname.
        hostname: String,
    },
    /// Raised when the network has no free address left.
    #[error("no free address available in network {network}")]
    AllocationExhausted {
        /// Subnet the allocation was attempted in.
        network: String,
    },
    /// Raised when a response body does not have the expected shape.
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// What was being parsed.
        what: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when an operation is attempted on a closed session.
    #[error("IPAM session is closed; cannot call {op}")]
    SessionClosed {
        /// Operation that was attempted.
        op: &'static str,
    },
    /// Raised when a required workflow option is not set.
    #[error("workflow option {key} is not set")]
    MissingOption {
        /// Option key that was expected.
        key: &'static str,
    },
    /// Raised when configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl IpamError {
    /// Returns true when the failure is transient and the whole workflow
    /// step should be handed back to the host for a later retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::Transport { .. } | Self::Connection(_)
        )
    }
}

impl From<ConfigError> for IpamError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
