//! # Engine
//!
//! The network engine: owns the control and data connections and wires the protocol components together.
//!
//! [`NetworkEngine`] is a handle to a session task spawned on the tokio runtime by [`NetworkEngine::connect`].
//! Every outcome is reported through the [`Observer`]; no method of the handle returns a protocol error.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pipeftp::{ChannelObserver, Endpoint, Event, NetworkEngine, Observer};
//!
//! # async fn run() {
//! let (observer, mut events) = ChannelObserver::new();
//! let observer: Arc<dyn Observer> = Arc::new(observer);
//! let mut engine = NetworkEngine::new(Arc::downgrade(&observer));
//! engine.login("anonymous", "anonymous");
//! engine.connect(Endpoint::new("127.0.0.1", 21));
//! while let Some(event) = events.recv().await {
//!     if let Event::ListingReceived(items) = event {
//!         println!("{} entries", items.len());
//!         break;
//!     }
//! }
//! engine.disconnect().await;
//! # }
//! ```

mod data_stream;
mod session;
pub mod tls;

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use self::data_stream::DataStream;
use self::session::{Request, Session};
#[cfg(feature = "rustls")]
pub use self::tls::{AsyncRustlsConnector, AsyncRustlsStream};
pub use self::tls::{AsyncTlsConnector, AsyncTlsStream};
use crate::command::Command;
use crate::framer::DEFAULT_MAX_LINE_LENGTH;
use crate::queue::CommandPacing;
use crate::{ConnectionState, Credentials, Endpoint, FtpError, Observer};

/// Default bound on the bytes of one listing
pub const DEFAULT_MAX_LISTING_SIZE: usize = 16 * 1024 * 1024;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on the bytes buffered without a line terminator on the control connection
    pub max_line_length: usize,
    /// Bound on the bytes accumulated from one data connection. Exceeding it closes the data connection
    pub max_listing_size: usize,
    pub command_pacing: CommandPacing,
    /// Connect the data channel to the control connection peer address instead of the one in the PASV reply
    pub passive_nat_workaround: bool,
    /// No timeout when `None`
    pub connect_timeout: Option<Duration>,
    /// Bound on the `QUIT` sent by [`NetworkEngine::disconnect`]
    pub quit_timeout: Duration,
    /// Used when the endpoint has TLS enabled. With the `rustls` feature, a connector trusting the
    /// webpki roots is used when none is set
    pub tls_connector: Option<Arc<dyn AsyncTlsConnector>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_listing_size: DEFAULT_MAX_LISTING_SIZE,
            command_pacing: CommandPacing::default(),
            passive_nat_workaround: false,
            connect_timeout: None,
            quit_timeout: Duration::from_secs(2),
            tls_connector: None,
        }
    }
}

struct SessionHandle {
    requests: mpsc::UnboundedSender<Request>,
    task: JoinHandle<()>,
}

/// Handle to the FTP engine
pub struct NetworkEngine {
    config: EngineConfig,
    observer: Weak<dyn Observer>,
    state: Arc<watch::Sender<ConnectionState>>,
    credentials: Option<Credentials>,
    session: Option<SessionHandle>,
}

impl NetworkEngine {
    /// Create a new engine. The observer is never kept alive by the engine
    pub fn new(observer: Weak<dyn Observer>) -> Self {
        Self {
            config: EngineConfig::default(),
            observer,
            state: Arc::new(watch::channel(ConnectionState::Disconnected).0),
            credentials: None,
            session: None,
        }
    }

    /// Replace the whole configuration. Applies to the next `connect`
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the connector used for implicit FTPS
    pub fn with_tls_connector(mut self, connector: impl AsyncTlsConnector + 'static) -> Self {
        self.config.tls_connector = Some(Arc::new(connector));
        self
    }

    pub fn with_command_pacing(mut self, pacing: CommandPacing) -> Self {
        self.config.command_pacing = pacing;
        self
    }

    pub fn with_max_line_length(mut self, limit: usize) -> Self {
        self.config.max_line_length = limit;
        self
    }

    pub fn with_max_listing_size(mut self, limit: usize) -> Self {
        self.config.max_listing_size = limit;
        self
    }

    /// Enable NAT workaround for passive mode. The data channel will use the IP of the control
    /// connection, which helps with servers announcing their private address
    pub fn with_passive_nat_workaround(mut self, enabled: bool) -> Self {
        self.config.passive_nat_workaround = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    pub fn with_quit_timeout(mut self, timeout: Duration) -> Self {
        self.config.quit_timeout = timeout;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Establish the control connection in background.
    ///
    /// Must be called from within a tokio runtime. The outcome is reported through
    /// `connection_established` or `error`.
    pub fn connect(&mut self, endpoint: Endpoint) {
        if self.is_running() {
            error!("connect to {} refused: a control connection already exists", endpoint);
            self.report(FtpError::ConnectionError(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "a control connection already exists",
            )));
            return;
        }
        debug!("connecting to {}", endpoint);
        let (requests, receiver) = mpsc::unbounded_channel();
        let session = Session::new(
            self.config.clone(),
            self.observer.clone(),
            self.state.clone(),
            self.credentials.clone(),
            receiver,
        );
        let task = tokio::spawn(session.run(endpoint));
        self.session = Some(SessionHandle { requests, task });
    }

    /// Stage credentials. They are sent once the server greets us, or right away if it already did
    pub fn login(&mut self, username: impl Into<String>, password: impl Into<String>) {
        let credentials = Credentials::new(username, password);
        self.credentials = Some(credentials.clone());
        if self.is_running() {
            self.request(Request::Login(credentials));
        }
    }

    /// Queue a raw command. Dropped (and logged) if there is no control connection
    pub fn send_command(&self, text: impl AsRef<str>) {
        self.request(Request::Send(Command::raw(text)));
    }

    /// Queue `CWD path`
    pub fn change_directory(&self, path: impl Into<String>) {
        self.request(Request::Send(Command::Cwd(path.into())));
    }

    /// Queue `PASV` and `LIST`; the listing is reported when the data connection closes.
    ///
    /// Right after login, the listing following the automatic `PASV` answers this request
    pub fn request_listing(&self) {
        self.request(Request::RequestListing);
    }

    /// Send a best-effort `QUIT`, then close both connections.
    ///
    /// Pending commands are discarded. Returns once the session is gone.
    pub async fn disconnect(&mut self) {
        if let Some(SessionHandle { requests, task }) = self.session.take() {
            if requests.send(Request::Disconnect).is_err() {
                debug!("session already terminated");
            }
            if let Err(err) = task.await {
                error!("session task failed: {}", err);
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!("disconnected");
    }

    fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| !session.task.is_finished())
            .unwrap_or(false)
    }

    fn request(&self, request: Request) {
        let Some(session) = self.session.as_ref() else {
            warn!("not connected; dropping {:?}", request);
            return;
        };
        if let Err(err) = session.requests.send(request) {
            warn!("not connected; dropping {:?}", err.0);
        }
    }

    fn report(&self, err: FtpError) {
        if let Some(observer) = self.observer.upgrade() {
            observer.error(&err);
        }
    }
}

impl Drop for NetworkEngine {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.task.abort();
        }
    }
}
