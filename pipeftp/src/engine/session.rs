//! # Session
//!
//! The task owning the connections of one session.
//!
//! Reader, writer and data tasks never touch the session state: they report through [`Signal`]s,
//! so the queue, the framer and the state machine are driven from this task only.

use std::fmt;
use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::data_stream::DataStream;
use super::tls::AsyncTlsConnector;
use super::EngineConfig;
use crate::command::Command;
use crate::framer::LineFramer;
use crate::list::parse_listing;
use crate::machine::{Action, ProtocolStateMachine};
use crate::parser::{Parsed, ResponseParser};
use crate::queue::CommandQueue;
use crate::{
    ConnectionState, Credentials, Endpoint, FtpError, FtpResult, FtpState, Observer, Response, Status,
};

const READ_BUFFER_SIZE: usize = 4096;

/// Requests from the engine handle
pub(super) enum Request {
    Login(Credentials),
    Send(Command),
    RequestListing,
    Disconnect,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login(credentials) => write!(f, "Login({})", credentials.username),
            Self::Send(command) => write!(f, "Send({})", command.redacted()),
            Self::RequestListing => write!(f, "RequestListing"),
            Self::Disconnect => write!(f, "Disconnect"),
        }
    }
}

/// Completions reported by the I/O tasks
enum Signal {
    Response(Response),
    Continuation(String),
    Malformed(FtpError),
    ControlClosed,
    ControlFailed(FtpError),
    WriteCompleted(std::io::Result<()>),
    DataOpened(u64),
    DataBytes(u64, Vec<u8>),
    DataClosed(u64),
    DataFailed(u64, FtpError),
}

enum Outbound {
    Command(Command),
    Quit(oneshot::Sender<std::io::Result<()>>),
}

struct ControlConnection {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    peer: Option<IpAddr>,
}

impl ControlConnection {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

struct DataConnection {
    generation: u64,
    task: JoinHandle<()>,
    opened: bool,
    /// 150 or 125 seen
    started: bool,
    /// 226 seen; the peer is about to close
    completed: bool,
    payload: Vec<u8>,
}

enum Flow {
    Continue,
    Stop,
}

pub(super) struct Session {
    config: EngineConfig,
    observer: Weak<dyn Observer>,
    state: Arc<watch::Sender<ConnectionState>>,
    requests: mpsc::UnboundedReceiver<Request>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals: mpsc::UnboundedReceiver<Signal>,
    machine: ProtocolStateMachine,
    queue: CommandQueue,
    tls: Option<(Arc<dyn AsyncTlsConnector>, String)>,
    control: Option<ControlConnection>,
    data: Option<DataConnection>,
    /// Opened once the completed transfer of `data` is drained
    next_data: Option<SocketAddr>,
    data_generation: u64,
}

impl Session {
    pub(super) fn new(
        config: EngineConfig,
        observer: Weak<dyn Observer>,
        state: Arc<watch::Sender<ConnectionState>>,
        credentials: Option<Credentials>,
        requests: mpsc::UnboundedReceiver<Request>,
    ) -> Self {
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let mut machine = ProtocolStateMachine::new();
        if let Some(credentials) = credentials {
            machine.stage_credentials(credentials);
        }
        Self {
            queue: CommandQueue::new(config.command_pacing),
            config,
            observer,
            state,
            requests,
            signals_tx,
            signals,
            machine,
            tls: None,
            control: None,
            data: None,
            next_data: None,
            data_generation: 0,
        }
    }

    pub(super) async fn run(mut self, endpoint: Endpoint) {
        let Some(stream) = self.establish(&endpoint).await else {
            return;
        };
        info!("connected to {}", endpoint);
        self.start_control(stream);
        self.notify(|o| o.connection_established());
        let actions = self.machine.on_connected();
        self.apply(actions);

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Disconnect) | None => {
                        self.shutdown().await;
                        return;
                    }
                    Some(request) => self.on_request(request),
                },
                Some(signal) = self.signals.recv() => {
                    if let Flow::Stop = self.on_signal(signal) {
                        return;
                    }
                }
            }
        }
    }

    /// Connect phase. Requests other than login and disconnect are dropped until the transport is up
    async fn establish(&mut self, endpoint: &Endpoint) -> Option<DataStream> {
        if endpoint.tls_enabled {
            match tls_connector(&self.config) {
                Ok(connector) => self.tls = Some((connector, endpoint.host.clone())),
                Err(err) => {
                    self.report(err);
                    return None;
                }
            }
        }
        let connect = connect_control(endpoint, self.config.connect_timeout, self.tls.clone());
        tokio::pin!(connect);
        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                request = self.requests.recv() => match request {
                    Some(Request::Login(credentials)) => {
                        let actions = self.machine.stage_credentials(credentials);
                        self.apply(actions);
                    }
                    Some(Request::Disconnect) | None => {
                        info!("connection to {} aborted", endpoint);
                        return None;
                    }
                    Some(request) => warn!("not connected yet; dropping {:?}", request),
                },
            }
        };
        match result {
            Ok(stream) => Some(stream),
            Err(err) => {
                error!("failed to connect to {}: {}", endpoint, err);
                self.report(err);
                None
            }
        }
    }

    fn start_control(&mut self, stream: DataStream) {
        let peer = stream.get_ref().peer_addr().ok().map(|addr| addr.ip());
        debug!(
            "control connection up (peer: {:?}, secure: {})",
            peer,
            stream.is_secure()
        );
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.control = Some(ControlConnection {
            outbound,
            reader: tokio::spawn(read_control(
                reader,
                self.config.max_line_length,
                self.signals_tx.clone(),
            )),
            writer: tokio::spawn(write_control(writer, outbound_rx, self.signals_tx.clone())),
            peer,
        });
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Login(credentials) => {
                let actions = self.machine.stage_credentials(credentials);
                self.apply(actions);
            }
            Request::Send(command) => self.submit(command),
            Request::RequestListing => {
                let actions = self.machine.request_listing();
                self.apply(actions);
            }
            Request::Disconnect => {}
        }
    }

    fn on_signal(&mut self, signal: Signal) -> Flow {
        match signal {
            Signal::Response(response) => {
                debug!("received {}", response);
                self.notify(|o| o.response_received(&response));
                self.track_transfer(&response);
                if let Some(next) = self.queue.on_response(&response) {
                    self.write(next);
                }
                let actions = self.machine.handle(&response);
                self.apply(actions);
            }
            Signal::Continuation(line) => {
                self.notify(|o| o.continuation_received(&line));
            }
            Signal::Malformed(err) => {
                warn!("{}", err);
                self.report(err);
            }
            Signal::ControlClosed => {
                info!("control connection closed by peer");
                self.connection_lost();
                return Flow::Stop;
            }
            Signal::ControlFailed(err) => {
                error!("control connection failed: {}", err);
                self.report(err);
                self.connection_lost();
                return Flow::Stop;
            }
            Signal::WriteCompleted(result) => {
                let success = match result {
                    Ok(()) => true,
                    Err(err) => {
                        error!("failed to write command: {}", err);
                        self.report(FtpError::SendError(err));
                        false
                    }
                };
                if let Some(next) = self.queue.on_send_completed(success) {
                    self.write(next);
                }
            }
            Signal::DataOpened(generation) => {
                if let Some(data) = self.current_data(generation) {
                    data.opened = true;
                    self.notify(|o| o.data_channel_opened());
                }
            }
            Signal::DataBytes(generation, bytes) => {
                let limit = self.config.max_listing_size;
                let Some(data) = self.current_data(generation) else {
                    return Flow::Continue;
                };
                if data.payload.len() + bytes.len() > limit {
                    error!("data connection sent more than {} bytes; closing it", limit);
                    self.report(FtpError::DataLimitExceeded { limit });
                    self.close_data();
                    self.open_next_data();
                } else {
                    data.payload.extend_from_slice(&bytes);
                    self.notify(|o| o.raw_data_received(&bytes));
                }
            }
            Signal::DataClosed(generation) => {
                if self.current_data(generation).is_some() {
                    if let Some(data) = self.data.take() {
                        debug!("data connection closed after {} bytes", data.payload.len());
                        self.notify(|o| o.data_channel_closed());
                        let items = parse_listing(&String::from_utf8_lossy(&data.payload));
                        self.notify(|o| o.listing_received(&items));
                    }
                    self.open_next_data();
                }
            }
            Signal::DataFailed(generation, err) => {
                if self.current_data(generation).is_some() {
                    error!("data connection failed: {}", err);
                    self.report(err);
                    if let Some(DataConnection { opened: true, .. }) = self.data.take() {
                        self.notify(|o| o.data_channel_closed());
                    }
                    self.open_next_data();
                }
            }
        }
        Flow::Continue
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Submit(command) => self.submit(command),
                Action::OpenDataConnection(addr) => self.open_data_connection(addr),
                Action::StateChanged(state) => self.publish(state),
                Action::LoggedIn => {
                    info!("logged in");
                    self.notify(|o| o.logged_in());
                }
                Action::TransferComplete => self.notify(|o| o.transfer_complete()),
                Action::Fail(err) => {
                    error!("{}", err);
                    self.report(err);
                }
            }
        }
    }

    fn submit(&mut self, command: Command) {
        if self.control.is_none() {
            warn!("not connected; dropping {}", command.redacted());
            return;
        }
        if let Some(command) = self.queue.submit(command) {
            self.write(command);
        }
    }

    /// Hand the command to the writer. If the writer is gone, the queue moves on
    fn write(&mut self, command: Command) {
        let mut next = Some(command);
        while let Some(command) = next.take() {
            let sent = self
                .control
                .as_ref()
                .map(|control| control.outbound.send(Outbound::Command(command)).is_ok())
                .unwrap_or(false);
            if sent {
                return;
            }
            self.report(FtpError::SendError(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "control connection writer is gone",
            )));
            next = self.queue.on_send_completed(false);
        }
    }

    /// Follow the transfer of the current data connection
    fn track_transfer(&mut self, response: &Response) {
        let Some(data) = self.data.as_mut() else {
            return;
        };
        match response.status() {
            Status::AboutToSend | Status::AlreadyOpen => data.started = true,
            Status::ClosingDataConnection => data.completed = true,
            _ => {}
        }
    }

    fn open_data_connection(&mut self, addr: SocketAddrV4) {
        if self.control.is_none() {
            self.machine.data_connection_refused();
            self.report(FtpError::NotConnected);
            return;
        }
        let state = self.machine.state();
        if !state.allows_data_connection() {
            warn!("refusing to open a data connection in state {:?}", state);
            self.machine.data_connection_refused();
            return;
        }
        let target = match (
            self.config.passive_nat_workaround,
            self.control.as_ref().and_then(|c| c.peer),
        ) {
            (true, Some(peer)) => {
                debug!("nat workaround: using {} instead of {}", peer, addr.ip());
                SocketAddr::new(peer, addr.port())
            }
            _ => SocketAddr::V4(addr),
        };
        match self.data.as_ref() {
            None => self.spawn_data(target),
            Some(data) if !data.started => {
                debug!(
                    "data connection #{} replaced before any transfer",
                    data.generation
                );
                self.close_data();
                self.spawn_data(target);
            }
            Some(data) if data.completed => {
                debug!(
                    "data connection to {} deferred until #{} is drained",
                    target, data.generation
                );
                self.next_data = Some(target);
            }
            Some(_) => {
                self.machine.data_connection_refused();
                self.report(FtpError::DataConnectionAlreadyOpen);
            }
        }
    }

    fn open_next_data(&mut self) {
        if let Some(target) = self.next_data.take() {
            self.spawn_data(target);
        }
    }

    fn spawn_data(&mut self, target: SocketAddr) {
        self.data_generation += 1;
        let generation = self.data_generation;
        debug!("opening data connection #{} to {}", generation, target);
        let task = tokio::spawn(run_data_connection(
            target,
            self.tls.clone(),
            generation,
            self.signals_tx.clone(),
        ));
        // opened on a 150: the transfer is already announced
        let started = matches!(
            self.machine.state(),
            ConnectionState::Connected(FtpState::DataTransferReady)
                | ConnectionState::Connected(FtpState::DataTransferInProgress)
        );
        self.data = Some(DataConnection {
            generation,
            task,
            opened: false,
            started,
            completed: false,
            payload: Vec::new(),
        });
    }

    fn current_data(&mut self, generation: u64) -> Option<&mut DataConnection> {
        self.data
            .as_mut()
            .filter(|data| data.generation == generation)
    }

    fn close_data(&mut self) {
        self.next_data = None;
        if let Some(data) = self.data.take() {
            data.task.abort();
            if data.opened {
                self.notify(|o| o.data_channel_closed());
            }
        }
    }

    /// Caller initiated: best-effort QUIT, then everything is released
    async fn shutdown(&mut self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("discarding {} queued commands", dropped);
        }
        if let Some(control) = self.control.take() {
            let (done, quit_sent) = oneshot::channel();
            if control.outbound.send(Outbound::Quit(done)).is_ok() {
                match tokio::time::timeout(self.config.quit_timeout, quit_sent).await {
                    Ok(Ok(Ok(()))) => debug!("QUIT sent"),
                    Ok(Ok(Err(err))) => warn!("failed to send QUIT: {}", err),
                    Ok(Err(_)) => warn!("control connection gone before QUIT"),
                    Err(_) => warn!("QUIT not sent within {:?}", self.config.quit_timeout),
                }
            }
            control.abort();
        }
        self.close_data();
        let actions = self.machine.on_disconnected();
        self.apply(actions);
    }

    /// Peer closed, read failure or framing error
    fn connection_lost(&mut self) {
        self.queue.clear();
        if let Some(control) = self.control.take() {
            control.abort();
        }
        self.close_data();
        let actions = self.machine.on_disconnected();
        self.apply(actions);
        self.notify(|o| o.connection_lost());
    }

    fn publish(&self, state: ConnectionState) {
        self.state.send_replace(state);
        self.notify(|o| o.state_changed(state));
    }

    fn report(&self, err: FtpError) {
        self.notify(|o| o.error(&err));
    }

    fn notify(&self, f: impl FnOnce(&dyn Observer)) {
        match self.observer.upgrade() {
            Some(observer) => f(observer.as_ref()),
            None => trace!("observer is gone; event dropped"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(control) = self.control.take() {
            control.abort();
        }
        if let Some(data) = self.data.take() {
            data.task.abort();
        }
    }
}

fn tls_connector(config: &EngineConfig) -> FtpResult<Arc<dyn AsyncTlsConnector>> {
    match config.tls_connector.clone() {
        Some(connector) => Ok(connector),
        None => default_tls_connector(),
    }
}

#[cfg(feature = "rustls")]
fn default_tls_connector() -> FtpResult<Arc<dyn AsyncTlsConnector>> {
    let connector = super::tls::AsyncRustlsConnector::with_webpki_roots()?;
    Ok(Arc::new(connector))
}

#[cfg(not(feature = "rustls"))]
fn default_tls_connector() -> FtpResult<Arc<dyn AsyncTlsConnector>> {
    Err(FtpError::SecureError(String::from(
        "TLS requested but no connector configured",
    )))
}

async fn connect_control(
    endpoint: &Endpoint,
    timeout: Option<Duration>,
    tls: Option<(Arc<dyn AsyncTlsConnector>, String)>,
) -> FtpResult<DataStream> {
    let connect = open_control(endpoint, tls);
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, connect).await.map_err(|_| {
            FtpError::ConnectionError(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connection not established within {timeout:?}"),
            ))
        })?,
        None => connect.await,
    }
}

/// TCP connect, then TLS handshake if enabled
async fn open_control(
    endpoint: &Endpoint,
    tls: Option<(Arc<dyn AsyncTlsConnector>, String)>,
) -> FtpResult<DataStream> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    let stream = TcpStream::connect(addr)
        .await
        .map_err(FtpError::ConnectionError)?;
    secure(stream, tls).await
}

async fn secure(
    stream: TcpStream,
    tls: Option<(Arc<dyn AsyncTlsConnector>, String)>,
) -> FtpResult<DataStream> {
    match tls {
        Some((connector, domain)) => {
            debug!("TLS handshake with {}", domain);
            connector.connect(&domain, stream).await.map(DataStream::Ssl)
        }
        None => Ok(DataStream::Tcp(stream)),
    }
}

async fn read_control<S>(
    mut reader: ReadHalf<S>,
    max_line_length: usize,
    signals: mpsc::UnboundedSender<Signal>,
) where
    S: AsyncRead,
{
    let mut framer = LineFramer::new(max_line_length);
    let mut parser = ResponseParser::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = signals.send(Signal::ControlClosed);
                return;
            }
            Ok(read) => read,
            Err(err) => {
                let _ = signals.send(Signal::ControlFailed(FtpError::ConnectionError(err)));
                return;
            }
        };
        let lines = match framer.feed(&buf[..read]) {
            Ok(lines) => lines,
            Err(err) => {
                let _ = signals.send(Signal::ControlFailed(err));
                return;
            }
        };
        for line in lines {
            trace!("CC IN: {}", line);
            let signal = match parser.parse_line(&line) {
                Ok(Parsed::Response(response)) => Signal::Response(response),
                Ok(Parsed::Continuation(text)) => Signal::Continuation(text),
                Err(err) => Signal::Malformed(err),
            };
            if signals.send(signal).is_err() {
                return;
            }
        }
    }
}

async fn write_control<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    signals: mpsc::UnboundedSender<Signal>,
) where
    S: AsyncWrite,
{
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Command(command) => {
                let result = write_command(&mut writer, &command).await;
                if signals.send(Signal::WriteCompleted(result)).is_err() {
                    return;
                }
            }
            Outbound::Quit(done) => {
                let result = write_command(&mut writer, &Command::Quit).await;
                let _ = done.send(result);
                return;
            }
        }
    }
}

async fn write_command<W>(writer: &mut W, command: &Command) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    trace!("CC OUT: {}", command.redacted());
    writer.write_all(command.to_string().as_bytes()).await?;
    writer.flush().await
}

async fn run_data_connection(
    target: SocketAddr,
    tls: Option<(Arc<dyn AsyncTlsConnector>, String)>,
    generation: u64,
    signals: mpsc::UnboundedSender<Signal>,
) {
    let stream = match TcpStream::connect(target).await {
        Ok(stream) => secure(stream, tls).await,
        Err(err) => Err(FtpError::ConnectionError(err)),
    };
    let mut stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = signals.send(Signal::DataFailed(generation, err));
            return;
        }
    };
    if signals.send(Signal::DataOpened(generation)).is_err() {
        return;
    }
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                let _ = signals.send(Signal::DataClosed(generation));
                return;
            }
            Ok(read) => {
                trace!("DC IN: {} bytes", read);
                if signals
                    .send(Signal::DataBytes(generation, buf[..read].to_vec()))
                    .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                let _ = signals.send(Signal::DataFailed(generation, FtpError::ConnectionError(err)));
                return;
            }
        }
    }
}
