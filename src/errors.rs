//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every session failure mode.
///
/// `Connection`, `Timeout` and `AlreadyConnected` form one family; use
/// [`AppError::is_connection`] to match all three at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Requested engine version is not installed or registered.
    Version(String),
    /// Establishing or maintaining the client/server link failed.
    Connection(String),
    /// The front-end did not become ready within the configured timeout.
    Timeout(String),
    /// The client already holds a connection to a server.
    AlreadyConnected(String),
    /// A remote procedure call failed; carries the remote error text.
    Api(String),
    /// The remote side violated an invariant the session relies on.
    Inconsistent(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// Local file-system or process failure.
    Io(String),
}

impl AppError {
    /// Whether this error belongs to the connection family.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::AlreadyConnected(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Version(msg) => write!(f, "version: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::AlreadyConnected(msg) => write!(f, "already connected: {msg}"),
            Self::Api(msg) => write!(f, "api: {msg}"),
            Self::Inconsistent(msg) => write!(f, "inconsistent: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
