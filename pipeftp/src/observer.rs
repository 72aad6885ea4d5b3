//! # Observer
//!
//! The event interface through which the engine talks back to its caller.
//!
//! The engine keeps the observer as a [`std::sync::Weak`] reference: it never extends the
//! caller's lifetime, and notifications to an observer which is gone are dropped.

use tokio::sync::mpsc;

use crate::list::ListingItem;
use crate::{ConnectionState, FtpError, Response};

/// Receives engine events. Every method defaults to a no-op.
///
/// Methods are called from the engine task: they must return quickly.
pub trait Observer: Send + Sync {
    /// The control connection is up (TLS included)
    fn connection_established(&self) {}

    /// The control connection is gone, either closed by the peer, failed or force-closed
    fn connection_lost(&self) {}

    /// The server accepted the credentials
    fn logged_in(&self) {}

    /// Any failure. The engine stays usable
    fn error(&self, _error: &FtpError) {}

    /// The data connection was closed and its content parsed as a directory listing
    fn listing_received(&self, _items: &[ListingItem]) {}

    /// Bytes arrived on the data connection, untouched
    fn raw_data_received(&self, _bytes: &[u8]) {}

    fn data_channel_opened(&self) {}

    fn data_channel_closed(&self) {}

    /// The server reported the end of a transfer (226)
    fn transfer_complete(&self) {}

    /// A reply line was parsed on the control connection
    fn response_received(&self, _response: &Response) {}

    /// A text line inside a multi-line reply. These lines don't drive the protocol
    fn continuation_received(&self, _line: &str) {}

    fn state_changed(&self, _state: ConnectionState) {}
}

/// Engine events as values, see [`ChannelObserver`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ConnectionEstablished,
    ConnectionLost,
    LoggedIn,
    Error(String),
    ListingReceived(Vec<ListingItem>),
    RawDataReceived(Vec<u8>),
    DataChannelOpened,
    DataChannelClosed,
    TransferComplete,
    ResponseReceived(Response),
    ContinuationReceived(String),
    StateChanged(ConnectionState),
}

/// An [`Observer`] forwarding every notification into a channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<Event>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: Event) {
        if self.sender.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

impl Observer for ChannelObserver {
    fn connection_established(&self) {
        self.send(Event::ConnectionEstablished);
    }

    fn connection_lost(&self) {
        self.send(Event::ConnectionLost);
    }

    fn logged_in(&self) {
        self.send(Event::LoggedIn);
    }

    fn error(&self, error: &FtpError) {
        self.send(Event::Error(error.to_string()));
    }

    fn listing_received(&self, items: &[ListingItem]) {
        self.send(Event::ListingReceived(items.to_vec()));
    }

    fn raw_data_received(&self, bytes: &[u8]) {
        self.send(Event::RawDataReceived(bytes.to_vec()));
    }

    fn data_channel_opened(&self) {
        self.send(Event::DataChannelOpened);
    }

    fn data_channel_closed(&self) {
        self.send(Event::DataChannelClosed);
    }

    fn transfer_complete(&self) {
        self.send(Event::TransferComplete);
    }

    fn response_received(&self, response: &Response) {
        self.send(Event::ResponseReceived(response.clone()));
    }

    fn continuation_received(&self, line: &str) {
        self.send(Event::ContinuationReceived(line.to_string()));
    }

    fn state_changed(&self, state: ConnectionState) {
        self.send(Event::StateChanged(state));
    }
}
