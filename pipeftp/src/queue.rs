//! # Queue
//!
//! Serializes command submission on the control connection.
//!
//! The queue doesn't perform any I/O: every method returns the command which must be
//! written now, if any, and the transport reports back through [`CommandQueue::on_send_completed`].

use std::collections::VecDeque;

use crate::command::Command;
use crate::Response;

/// When the next queued command may be dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandPacing {
    /// As soon as the previous write completed, whatever the outcome
    #[default]
    WriteCompletion,
    /// Only once the server replied to the previous command with a final (non 1xx) reply.
    /// A failed write releases the queue immediately, since no reply will ever come.
    ResponseReceipt,
}

/// FIFO of commands with at most one in flight
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<Command>,
    sending: bool,
    awaiting_reply: bool,
    // multi-line reply opened before the in-flight command was dispatched
    unsolicited: Option<u32>,
    pacing: CommandPacing,
}

impl CommandQueue {
    pub fn new(pacing: CommandPacing) -> Self {
        Self {
            pacing,
            ..Self::default()
        }
    }

    /// Enqueue `command`. Returns it back (or the queue head) if it can be sent right away
    pub fn submit(&mut self, command: Command) -> Option<Command> {
        trace!("queued {}", command.redacted());
        self.pending.push_back(command);
        self.dispatch()
    }

    /// The transport finished writing the in-flight command.
    ///
    /// The queue advances on failure too: the failed command is not retried.
    pub fn on_send_completed(&mut self, success: bool) -> Option<Command> {
        if !self.sending {
            warn!("send completion with no command in flight");
            return None;
        }
        self.sending = false;
        if !success {
            self.awaiting_reply = false;
        }
        self.dispatch()
    }

    /// A reply arrived on the control connection.
    ///
    /// The reply may be processed before the write completion of its command: the in-flight command
    /// is released anyway and the next one goes out once the write is reported.
    pub fn on_response(&mut self, response: &Response) -> Option<Command> {
        if !self.awaiting_reply {
            if response.multiline {
                self.unsolicited = Some(response.code);
            }
            return None;
        }
        if response.is_preliminary() || response.multiline {
            return None;
        }
        if self.unsolicited.take() == Some(response.code) {
            trace!("end of a reply sent before {} was dispatched", response.code);
            return None;
        }
        self.awaiting_reply = false;
        self.dispatch()
    }

    /// Discard every pending command. Returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.sending = false;
        self.awaiting_reply = false;
        self.unsolicited = None;
        dropped
    }

    /// Whether a command is being written
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Amount of commands waiting to be sent
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pacing(&self) -> CommandPacing {
        self.pacing
    }

    fn dispatch(&mut self) -> Option<Command> {
        if self.sending || self.awaiting_reply {
            return None;
        }
        let command = self.pending.pop_front()?;
        self.sending = true;
        self.awaiting_reply = self.pacing == CommandPacing::ResponseReceipt;
        Some(command)
    }
}

#[cfg(test)]
mod test {

    use pretty_assertions::assert_eq;

    use super::*;

    fn user() -> Command {
        Command::raw("USER a")
    }

    fn pass() -> Command {
        Command::raw("PASS b")
    }

    #[test]
    fn should_send_in_submission_order_one_at_a_time() {
        let mut queue = CommandQueue::default();
        let mut sent = Vec::new();
        sent.extend(queue.submit(user()));
        assert_eq!(queue.submit(pass()), None);
        assert_eq!(queue.submit(Command::Pasv), None);
        assert_eq!(sent, vec![user()]);
        assert!(queue.is_sending());
        assert_eq!(queue.len(), 2);

        sent.extend(queue.on_send_completed(true));
        assert_eq!(sent, vec![user(), pass()]);
        sent.extend(queue.on_send_completed(true));
        assert_eq!(sent, vec![user(), pass(), Command::Pasv]);
        assert_eq!(queue.on_send_completed(true), None);
        assert!(!queue.is_sending());
        assert!(queue.is_empty());
    }

    #[test]
    fn should_advance_after_failed_send() {
        let mut queue = CommandQueue::default();
        assert_eq!(queue.submit(user()), Some(user()));
        assert_eq!(queue.submit(pass()), None);
        assert_eq!(queue.on_send_completed(false), Some(pass()));
    }

    #[test]
    fn should_ignore_spurious_completion() {
        let mut queue = CommandQueue::default();
        assert_eq!(queue.on_send_completed(true), None);
        assert_eq!(queue.submit(user()), Some(user()));
    }

    #[test]
    fn should_wait_for_reply_when_pacing_on_response() {
        let mut queue = CommandQueue::new(CommandPacing::ResponseReceipt);
        assert_eq!(queue.submit(user()), Some(user()));
        assert_eq!(queue.submit(pass()), None);
        assert_eq!(queue.on_send_completed(true), None);
        // preliminary and multi-line openers don't release
        assert_eq!(queue.on_response(&Response::new(150, "about to send")), None);
        let mut banner = Response::new(331, "hi");
        banner.multiline = true;
        assert_eq!(queue.on_response(&banner), None);
        assert_eq!(
            queue.on_response(&Response::new(331, "need password")),
            Some(pass())
        );
        // a failed write releases immediately
        assert_eq!(queue.submit(Command::Pasv), None);
        assert_eq!(queue.on_send_completed(false), Some(Command::Pasv));
    }

    #[test]
    fn should_ignore_unsolicited_replies() {
        let mut queue = CommandQueue::new(CommandPacing::ResponseReceipt);
        assert_eq!(queue.on_response(&Response::new(220, "welcome")), None);
        assert_eq!(queue.submit(user()), Some(user()));
    }

    #[test]
    fn should_release_when_reply_precedes_write_completion() {
        let mut queue = CommandQueue::new(CommandPacing::ResponseReceipt);
        assert_eq!(queue.submit(user()), Some(user()));
        assert_eq!(queue.submit(pass()), None);
        // reader task was faster than the writer task
        assert_eq!(queue.on_response(&Response::new(331, "need password")), None);
        assert_eq!(queue.on_send_completed(true), Some(pass()));
        assert_eq!(queue.on_send_completed(true), None);
        assert_eq!(queue.submit(Command::Pasv), None);
        assert_eq!(
            queue.on_response(&Response::new(230, "logged in")),
            Some(Command::Pasv)
        );
    }

    #[test]
    fn should_not_take_banner_end_as_reply() {
        let mut queue = CommandQueue::new(CommandPacing::ResponseReceipt);
        let mut banner = Response::new(220, "Mock FTP");
        banner.multiline = true;
        assert_eq!(queue.on_response(&banner), None);
        // USER is dispatched while the banner is still being processed
        assert_eq!(queue.submit(user()), Some(user()));
        assert_eq!(queue.submit(pass()), None);
        assert_eq!(queue.on_response(&Response::new(220, "ready")), None);
        assert_eq!(queue.on_send_completed(true), None);
        assert_eq!(
            queue.on_response(&Response::new(331, "need password")),
            Some(pass())
        );
    }

    #[test]
    fn should_discard_pending_on_clear() {
        let mut queue = CommandQueue::default();
        assert!(queue.submit(user()).is_some());
        assert!(queue.submit(pass()).is_none());
        assert!(queue.submit(Command::Pasv).is_none());
        assert_eq!(queue.clear(), 2);
        assert!(!queue.is_sending());
        assert_eq!(queue.submit(Command::Quit), Some(Command::Quit));
    }
}
