//! # Machine
//!
//! The protocol state machine driving login and listing.
//!
//! It is fed parsed replies and answers with the [`Action`]s the engine must carry out.
//!
//! | Code | New state                      | Side effect                                   |
//! |------|--------------------------------|-----------------------------------------------|
//! | 220  | `Connected(Welcome)`           | submit `USER`                                 |
//! | 331  | `Connected(WaitingForPassword)`| submit `PASS`                                 |
//! | 230  | `Connected(LoggedIn)`          | submit `PASV`, logged in event                |
//! | 227  | `Connected(PassiveMode)`       | open data connection                          |
//! | 150  | `Connected(DataTransferReady)` | open data connection if none was opened       |
//! | 125  | `Connected(DataTransferInProgress)` | -                                        |
//! | 226  | `Connected(DataTransferComplete)` | transfer complete event                    |
//!
//! Any other code leaves the state untouched.

use std::net::SocketAddrV4;

use crate::command::Command;
use crate::passive;
use crate::{ConnectionState, Credentials, FtpError, FtpState, Response, Status};

/// What the engine must do after a transition
#[derive(Debug)]
pub enum Action {
    Submit(Command),
    OpenDataConnection(SocketAddrV4),
    StateChanged(ConnectionState),
    LoggedIn,
    TransferComplete,
    Fail(FtpError),
}

#[derive(Debug, Default)]
pub struct ProtocolStateMachine {
    state: ConnectionState,
    credentials: Option<Credentials>,
    transport_up: bool,
    // one login attempt
    user_sent: bool,
    pass_sent: bool,
    login_notified: bool,
    // current transfer
    data_requested: bool,
    list_pending: bool,
}

impl ProtocolStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Stage credentials for the next login attempt.
    ///
    /// If the greeting was already received (or a previous attempt was refused), `USER` is submitted right away.
    pub fn stage_credentials(&mut self, credentials: Credentials) -> Vec<Action> {
        debug!("staging credentials for user '{}'", credentials.username);
        self.credentials = Some(credentials);
        self.user_sent = false;
        self.pass_sent = false;
        self.login_notified = false;
        let mut actions = Vec::new();
        match self.state {
            ConnectionState::Disconnected if self.transport_up => {
                self.transition(FtpState::Idle, &mut actions);
            }
            ConnectionState::Connected(FtpState::Welcome)
            | ConnectionState::Connected(FtpState::WaitingForPassword) => {
                self.submit_user(&mut actions);
            }
            _ => {}
        }
        actions
    }

    /// The control transport is up
    pub fn on_connected(&mut self) -> Vec<Action> {
        self.transport_up = true;
        self.reset_session();
        let mut actions = Vec::new();
        if self.credentials.is_some() {
            self.transition(FtpState::Idle, &mut actions);
        }
        actions
    }

    /// The control transport is gone. Credentials are kept for the next connection
    pub fn on_disconnected(&mut self) -> Vec<Action> {
        self.transport_up = false;
        self.reset_session();
        let mut actions = Vec::new();
        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            actions.push(Action::StateChanged(self.state));
        }
        actions
    }

    /// Commands for a directory listing of the working directory.
    ///
    /// Nothing is submitted while the `PASV` sent on login is still unanswered: its `LIST` serves the request.
    pub fn request_listing(&mut self) -> Vec<Action> {
        if self.list_pending {
            debug!("a listing is already on its way");
            return Vec::new();
        }
        vec![
            Action::Submit(Command::Pasv),
            Action::Submit(Command::List(None)),
        ]
    }

    /// The engine didn't open the data connection it was asked for
    pub fn data_connection_refused(&mut self) {
        self.data_requested = false;
    }

    /// Feed a reply received on the control connection
    pub fn handle(&mut self, response: &Response) -> Vec<Action> {
        let mut actions = Vec::new();
        match response.status() {
            Status::Ready => {
                self.transition(FtpState::Welcome, &mut actions);
                if self.credentials.is_some() {
                    self.submit_user(&mut actions);
                } else {
                    debug!("server greeted before credentials were staged; USER deferred");
                }
            }
            Status::NeedPassword => {
                self.transition(FtpState::WaitingForPassword, &mut actions);
                if let (false, Some(credentials)) = (self.pass_sent, self.credentials.as_ref()) {
                    actions.push(Action::Submit(Command::Pass(credentials.password.clone())));
                    self.pass_sent = true;
                }
            }
            Status::LoggedIn => {
                self.transition(FtpState::LoggedIn, &mut actions);
                if !self.login_notified {
                    self.login_notified = true;
                    self.list_pending = true;
                    actions.push(Action::Submit(Command::Pasv));
                    actions.push(Action::LoggedIn);
                }
            }
            Status::PassiveMode => {
                self.transition(FtpState::PassiveMode, &mut actions);
                self.open_data_connection(response, &mut actions);
            }
            Status::AboutToSend => {
                self.transition(FtpState::DataTransferReady, &mut actions);
                if !self.data_requested {
                    self.open_data_connection(response, &mut actions);
                }
            }
            Status::AlreadyOpen => {
                self.transition(FtpState::DataTransferInProgress, &mut actions);
            }
            Status::ClosingDataConnection => {
                self.transition(FtpState::DataTransferComplete, &mut actions);
                self.data_requested = false;
                actions.push(Action::TransferComplete);
            }
            _ if self.list_pending && response.code >= 400 => {
                debug!("passive mode refused ({}); no listing", response.code);
                self.list_pending = false;
            }
            _ => trace!("no transition for {}", response.code),
        }
        actions
    }

    fn submit_user(&mut self, actions: &mut Vec<Action>) {
        if let (false, Some(credentials)) = (self.user_sent, self.credentials.as_ref()) {
            actions.push(Action::Submit(Command::User(credentials.username.clone())));
            self.user_sent = true;
        }
    }

    fn open_data_connection(&mut self, response: &Response, actions: &mut Vec<Action>) {
        match passive::resolve(&response.message) {
            Ok(addr) => {
                self.data_requested = true;
                actions.push(Action::OpenDataConnection(addr));
                if self.list_pending {
                    self.list_pending = false;
                    actions.push(Action::Submit(Command::List(None)));
                }
            }
            Err(err) => actions.push(Action::Fail(err)),
        }
    }

    fn transition(&mut self, state: FtpState, actions: &mut Vec<Action>) {
        let state = ConnectionState::Connected(state);
        if self.state != state {
            debug!("state {:?} -> {:?}", self.state, state);
            self.state = state;
            actions.push(Action::StateChanged(state));
        }
    }

    fn reset_session(&mut self) {
        self.user_sent = false;
        self.pass_sent = false;
        self.login_notified = false;
        self.data_requested = false;
        self.list_pending = false;
    }
}

#[cfg(test)]
mod test {

    use std::net::Ipv4Addr;

    use pretty_assertions::assert_eq;

    use super::*;

    fn submitted(actions: &[Action]) -> Vec<Command> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Submit(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn opened(actions: &[Action]) -> Vec<SocketAddrV4> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::OpenDataConnection(addr) => Some(*addr),
                _ => None,
            })
            .collect()
    }

    fn logged_in_machine() -> ProtocolStateMachine {
        let mut machine = ProtocolStateMachine::new();
        machine.stage_credentials(Credentials::new("a", "b"));
        machine.on_connected();
        for code in [220, 331, 230] {
            machine.handle(&Response::new(code, "ok"));
        }
        machine
    }

    #[test]
    fn should_drive_login_sequence() {
        let mut machine = ProtocolStateMachine::new();
        assert!(machine.stage_credentials(Credentials::new("a", "b")).is_empty());
        assert_eq!(machine.state(), ConnectionState::Disconnected);

        let mut states = vec![machine.state()];
        let mut commands = Vec::new();
        let mut logged_in = 0;
        for (code, message) in [
            (220, "Service ready"),
            (331, "Password required"),
            (230, "Logged in"),
        ] {
            let actions = machine.handle(&Response::new(code, message));
            states.push(machine.state());
            commands.extend(submitted(&actions));
            logged_in += actions
                .iter()
                .filter(|a| matches!(a, Action::LoggedIn))
                .count();
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connected(FtpState::Welcome),
                ConnectionState::Connected(FtpState::WaitingForPassword),
                ConnectionState::Connected(FtpState::LoggedIn),
            ]
        );
        assert_eq!(
            commands,
            vec![
                Command::User(String::from("a")),
                Command::Pass(String::from("b")),
                Command::Pasv
            ]
        );
        assert_eq!(logged_in, 1);
    }

    #[test]
    fn should_become_idle_once_connected_with_credentials() {
        let mut machine = ProtocolStateMachine::new();
        assert!(machine.on_connected().is_empty());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        let actions = machine.stage_credentials(Credentials::new("a", "b"));
        assert!(matches!(
            actions.as_slice(),
            [Action::StateChanged(ConnectionState::Connected(FtpState::Idle))]
        ));
        assert_eq!(machine.state(), ConnectionState::Connected(FtpState::Idle));
    }

    #[test]
    fn should_defer_user_until_credentials() {
        let mut machine = ProtocolStateMachine::new();
        machine.on_connected();
        let actions = machine.handle(&Response::new(220, "hello"));
        assert!(submitted(&actions).is_empty());
        assert_eq!(machine.state(), ConnectionState::Connected(FtpState::Welcome));
        let actions = machine.stage_credentials(Credentials::new("omar", "pwd"));
        assert_eq!(
            submitted(&actions),
            vec![Command::User(String::from("omar"))]
        );
    }

    #[test]
    fn should_send_login_commands_once_per_attempt() {
        let mut machine = ProtocolStateMachine::new();
        machine.stage_credentials(Credentials::new("a", "b"));
        machine.on_connected();
        let mut banner = Response::new(220, "Welcome");
        banner.multiline = true;
        let mut commands = submitted(&machine.handle(&banner));
        commands.extend(submitted(&machine.handle(&Response::new(220, "Ready"))));
        commands.extend(submitted(&machine.handle(&Response::new(331, "pwd"))));
        commands.extend(submitted(&machine.handle(&Response::new(230, "ok"))));
        commands.extend(submitted(&machine.handle(&Response::new(230, "ok"))));
        assert_eq!(
            commands,
            vec![
                Command::User(String::from("a")),
                Command::Pass(String::from("b")),
                Command::Pasv
            ]
        );
    }

    #[test]
    fn should_retry_login_with_new_credentials_after_refusal() {
        let mut machine = ProtocolStateMachine::new();
        machine.stage_credentials(Credentials::new("a", "wrong"));
        machine.on_connected();
        machine.handle(&Response::new(220, "ready"));
        machine.handle(&Response::new(331, "pwd"));
        assert!(machine.handle(&Response::new(530, "Login incorrect")).is_empty());
        assert_eq!(
            machine.state(),
            ConnectionState::Connected(FtpState::WaitingForPassword)
        );
        let actions = machine.stage_credentials(Credentials::new("a", "right"));
        assert_eq!(submitted(&actions), vec![Command::User(String::from("a"))]);
        let actions = machine.handle(&Response::new(331, "pwd"));
        assert_eq!(
            submitted(&actions),
            vec![Command::Pass(String::from("right"))]
        );
    }

    #[test]
    fn should_open_data_connection_and_list_after_login_pasv() {
        let mut machine = logged_in_machine();
        let actions = machine.handle(&Response::new(
            227,
            "Entering Passive Mode (192,168,1,100,4,223)",
        ));
        assert_eq!(
            machine.state(),
            ConnectionState::Connected(FtpState::PassiveMode)
        );
        assert_eq!(
            opened(&actions),
            vec![SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 100), 1247)]
        );
        assert_eq!(submitted(&actions), vec![Command::List(None)]);
        // 150 doesn't open a second connection
        let actions = machine.handle(&Response::new(150, "Here comes the listing"));
        assert_eq!(
            machine.state(),
            ConnectionState::Connected(FtpState::DataTransferReady)
        );
        assert!(actions.iter().all(|a| matches!(a, Action::StateChanged(_))));
        let actions = machine.handle(&Response::new(226, "Transfer complete"));
        assert_eq!(
            machine.state(),
            ConnectionState::Connected(FtpState::DataTransferComplete)
        );
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::TransferComplete)));
    }

    #[test]
    fn should_reuse_login_pasv_when_listing_requested() {
        let mut machine = logged_in_machine();
        assert!(machine.request_listing().is_empty());
        let actions = machine.handle(&Response::new(227, "ok (127,0,0,1,0,20)"));
        assert_eq!(opened(&actions).len(), 1);
        assert_eq!(submitted(&actions), vec![Command::List(None)]);
    }

    #[test]
    fn should_not_list_twice_when_listing_requested() {
        let mut machine = logged_in_machine();
        machine.handle(&Response::new(227, "ok (127,0,0,1,0,20)"));
        machine.handle(&Response::new(150, "listing"));
        machine.handle(&Response::new(226, "done"));
        assert_eq!(
            submitted(&machine.request_listing()),
            vec![Command::Pasv, Command::List(None)]
        );
        let actions = machine.handle(&Response::new(227, "ok (127,0,0,1,0,21)"));
        assert_eq!(opened(&actions).len(), 1);
        assert!(submitted(&actions).is_empty());
    }

    #[test]
    fn should_request_pasv_again_when_login_pasv_is_refused() {
        let mut machine = logged_in_machine();
        assert!(machine.handle(&Response::new(500, "PASV not understood")).is_empty());
        assert_eq!(
            submitted(&machine.request_listing()),
            vec![Command::Pasv, Command::List(None)]
        );
    }

    #[test]
    fn should_open_from_150_after_refused_open() {
        let mut machine = logged_in_machine();
        machine.handle(&Response::new(227, "ok (127,0,0,1,0,20)"));
        machine.data_connection_refused();
        let actions = machine.handle(&Response::new(150, "Opening (127,0,0,1,0,20)"));
        assert_eq!(opened(&actions).len(), 1);
    }

    #[test]
    fn should_open_from_150_when_no_pasv_was_seen() {
        let mut machine = logged_in_machine();
        let actions = machine.handle(&Response::new(150, "Opening (10,0,0,2,0,21)"));
        assert_eq!(
            opened(&actions),
            vec![SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 21)]
        );
        assert_eq!(submitted(&actions), vec![Command::List(None)]);
    }

    #[test]
    fn should_report_bad_passive_address() {
        let mut machine = logged_in_machine();
        let actions = machine.handle(&Response::new(227, "Entering Passive Mode (1,2,3,4,5)"));
        assert_eq!(
            machine.state(),
            ConnectionState::Connected(FtpState::PassiveMode)
        );
        assert!(opened(&actions).is_empty());
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Fail(FtpError::PassiveAddress(_)))));
    }

    #[test]
    fn should_enter_transfer_in_progress_on_125() {
        let mut machine = logged_in_machine();
        machine.handle(&Response::new(125, "Data connection already open"));
        assert_eq!(
            machine.state(),
            ConnectionState::Connected(FtpState::DataTransferInProgress)
        );
    }

    #[test]
    fn should_ignore_unknown_codes() {
        let mut machine = logged_in_machine();
        for code in [200, 250, 421, 500, 530, 999] {
            assert!(machine.handle(&Response::new(code, "whatever")).is_empty());
            assert_eq!(
                machine.state(),
                ConnectionState::Connected(FtpState::LoggedIn)
            );
        }
    }

    #[test]
    fn should_reset_on_disconnect() {
        let mut machine = logged_in_machine();
        let actions = machine.on_disconnected();
        assert!(matches!(
            actions.as_slice(),
            [Action::StateChanged(ConnectionState::Disconnected)]
        ));
        assert!(machine.on_disconnected().is_empty());
        assert!(machine.has_credentials());
        // new connection, new attempt
        machine.on_connected();
        let actions = machine.handle(&Response::new(220, "ready"));
        assert_eq!(submitted(&actions), vec![Command::User(String::from("a"))]);
    }
}
