#![crate_name = "pipeftp"]
#![crate_type = "lib"]

//! # pipeftp
//!
//! pipeftp is an event-driven FTP client engine written in Rust on top of tokio, with optional implicit FTPS support.
//!
//! The engine opens a control connection, logs in, negotiates passive mode data connections and
//! reports everything that happens to an [`Observer`]. Nothing is returned to the caller as an error:
//! failures are events too.
//!
//! The protocol components are plain, I/O free types which can be used on their own:
//!
//! - [`framer::LineFramer`]: recovers CRLF lines from arbitrary chunks
//! - [`parser::ResponseParser`]: turns lines into [`Response`]s
//! - [`passive::resolve`]: extracts the data connection address from a PASV reply
//! - [`queue::CommandQueue`]: keeps at most one command in flight
//! - [`machine::ProtocolStateMachine`]: sequences login and listing
//!
//! ## Get started
//!
//! ```toml
//! pipeftp = "^0.3"
//! ```
//!
//! ### Features
//!
//! - `rustls` (default): implicit FTPS through `tokio-rustls`, trusting the `webpki-roots` certificates
//! - `no-log`: disable logging
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pipeftp::{ChannelObserver, Endpoint, Event, NetworkEngine, Observer};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let (observer, mut events) = ChannelObserver::new();
//!     let observer: Arc<dyn Observer> = Arc::new(observer);
//!     let mut engine = NetworkEngine::new(Arc::downgrade(&observer));
//!     engine.login("test", "test");
//!     engine.connect(Endpoint::new("127.0.0.1", 10021));
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             Event::ListingReceived(items) => {
//!                 for item in items {
//!                     println!("{}", item.name);
//!                 }
//!                 break;
//!             }
//!             Event::Error(err) => eprintln!("{err}"),
//!             _ => {}
//!         }
//!     }
//!     engine.disconnect().await;
//! }
//! ```
//!
//! ## FTPS
//!
//! Connect to an [`Endpoint::secure`] endpoint: the TLS session is established before the server greeting,
//! and every data connection is wrapped as well. A custom connector can be set with
//! [`NetworkEngine::with_tls_connector`].
//!

#![doc(html_playground_url = "https://play.rust-lang.org")]

// -- common deps
#[macro_use]
extern crate lazy_regex;
#[macro_use]
extern crate log;

// -- private
mod status;

// -- public
pub mod command;
pub mod engine;
pub mod framer;
pub mod list;
pub mod machine;
pub mod observer;
pub mod parser;
pub mod passive;
pub mod queue;
pub mod types;

// -- secure deps
#[cfg(feature = "rustls")]
pub use tokio_rustls;

// -- export
pub use command::Command;
#[cfg(feature = "rustls")]
pub use engine::AsyncRustlsConnector;
pub use engine::{AsyncTlsConnector, EngineConfig, NetworkEngine};
pub use list::{ItemKind, ListingItem};
pub use observer::{ChannelObserver, Event, Observer};
pub use queue::CommandPacing;
pub use status::Status;
pub use types::{ConnectionState, Credentials, Endpoint, FtpError, FtpResult, FtpState, Response};

// -- test logging
#[cfg(test)]
pub fn log_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}
