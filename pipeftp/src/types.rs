//! # Types
//!
//! Errors, responses and the connection state shared by every component of the engine

use std::fmt;

use thiserror::Error;

use super::Status;

/// A shorthand for a Result whose error type is always an FtpError.
pub type FtpResult<T> = std::result::Result<T, FtpError>;

/// `FtpError` is a library-global error type to describe the different kinds of
/// errors that might occur while driving an FTP session.
///
/// None of these are fatal for the engine: they are reported to the observer and the
/// engine stays usable, except for [`FtpError::FramingError`] which closes the offending connection.
#[derive(Debug, Error)]
pub enum FtpError {
    /// DNS/TCP failure or refused connection
    #[error("Connection error: {0}")]
    ConnectionError(std::io::Error),
    /// There was an error with the secure stream
    #[error("Secure error: {0}")]
    SecureError(String),
    /// The peer sent more than `limit` bytes without a line terminator
    #[error("Framing error: no line terminator within {limit} bytes")]
    FramingError { limit: usize },
    /// The response syntax is invalid. Contains the offending line
    #[error("Malformed response: {0:?}")]
    BadResponse(String),
    /// The PASV tuple couldn't be resolved to an address
    #[error("Invalid passive address: {0}")]
    PassiveAddress(String),
    /// Write failure on the control or data transport
    #[error("Send error: {0}")]
    SendError(std::io::Error),
    /// The data connection carried more than `limit` bytes and was closed
    #[error("Data connection exceeded {limit} bytes")]
    DataLimitExceeded { limit: usize },
    /// A data connection is already open; only one can exist at a time
    #[error("Data connection already open")]
    DataConnectionAlreadyOpen,
    /// There is no control connection
    #[error("Not connected")]
    NotConnected,
}

/// Defines a response from the ftp server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// The three digits code, never checked against a registry
    pub code: u32,
    /// Everything after the separator
    pub message: String,
    /// The whole framed line
    pub raw: String,
    /// Whether the separator was a hyphen (first line of a multi-line reply)
    pub multiline: bool,
}

impl Response {
    /// Instantiates a new single-line `Response`
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            raw: format!("{code} {message}"),
            code,
            message,
            multiline: false,
        }
    }

    /// Get the named status for the response code
    pub fn status(&self) -> Status {
        Status::from(self.code)
    }

    /// Whether this is a 1xx preliminary reply (another reply will follow for the same command)
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Address of the control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Implicit FTPS: the TLS session is established before any protocol byte
    pub tls_enabled: bool,
}

impl Endpoint {
    /// A plain FTP endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls_enabled: false,
        }
    }

    /// An implicit FTPS endpoint
    pub fn secure(host: impl Into<String>, port: u16) -> Self {
        Self {
            tls_enabled: true,
            ..Self::new(host, port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls_enabled { "ftps" } else { "ftp" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// Login credentials, staged before the server greets us
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Protocol state of a live control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FtpState {
    Idle,
    Welcome,
    WaitingForPassword,
    LoggedIn,
    PassiveMode,
    DataTransferReady,
    DataTransferInProgress,
    DataTransferComplete,
}

/// Connection state exposed to the caller. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected(FtpState),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// A data connection may only be created in these states
    pub fn allows_data_connection(&self) -> bool {
        matches!(
            self,
            Self::Connected(FtpState::PassiveMode) | Self::Connected(FtpState::DataTransferReady)
        )
    }
}
