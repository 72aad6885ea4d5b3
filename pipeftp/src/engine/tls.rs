//! # Tls
//!
//! Tls wrappers.
//!
//! TLS is implicit: the handshake runs on the fresh TCP socket before any protocol byte,
//! for the control connection and for every data connection of the session.

use std::fmt::Debug;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::FtpResult;

#[cfg(feature = "rustls")]
mod rustls;
#[cfg(feature = "rustls")]
pub use self::rustls::{AsyncRustlsConnector, AsyncRustlsStream};

/// Performs the TLS handshake over an established TCP stream
#[async_trait]
pub trait AsyncTlsConnector: Debug + Send + Sync {
    async fn connect(&self, domain: &str, stream: TcpStream) -> FtpResult<Box<dyn AsyncTlsStream>>;
}

/// An encrypted transport, used as an opaque byte stream
pub trait AsyncTlsStream: Debug + AsyncRead + AsyncWrite + Unpin + Send {
    /// Get ref to underlying tcp stream
    fn get_ref(&self) -> &TcpStream;
}
