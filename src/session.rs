//! POP3 session state machine
//!
//! One value per client connection, fed complete command lines by
//! the server loop and pushing its replies into the connection's
//! outbound queue. Handlers never await: anything that could block
//! (the RETR body) is expressed as queue state and driven forward by
//! the drain.
//!
//! States follow RFC 1939: AUTHORIZATION until a successful PASS,
//! then TRANSACTION, then UPDATE on QUIT (the only path that commits
//! pending deletions).

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::maildir::{self, Mailfile};
use crate::pipeline;
use crate::queue::OutboundQueue;
use crate::server::{ServerState, lock_state};

/// What the connection should do after handling an event.
///
/// Mirrors the tri-state every handler in the system speaks: keep
/// going, close gracefully (farewell, drain, close), or drop the
/// connection as failed (no farewell, no UPDATE work).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Keep,
    Close,
    Error,
}

pub struct PopSession {
    username: Option<String>,
    authenticated: bool,
    update: bool,
    mails: Vec<Mailfile>,
}

impl PopSession {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            username: None,
            authenticated: false,
            update: false,
            mails: Vec::new(),
        }
    }

    /// Queue the server greeting.
    pub fn greet(queue: &mut OutboundQueue) {
        queue.push_bytes(*b"+OK POP3 server ready\r\n");
    }

    /// The authenticated username, if any.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Handle one complete command line (CRLF already stripped).
    pub fn handle_line(
        &mut self,
        line: &str,
        state: &Mutex<ServerState>,
        queue: &mut OutboundQueue,
    ) -> Flow {
        if self.update {
            // Client already quit; ignore whatever else it pipelined.
            return Flow::Keep;
        }

        let tokens: Vec<&str> = line.split(' ').collect();
        let cmd = tokens[0].to_ascii_uppercase();
        let args = &tokens[1..];
        debug!(cmd = %cmd, argc = args.len(), "pop3 command");

        if self.authenticated {
            self.handle_transaction(&cmd, args, line, state, queue)
        } else {
            self.handle_authorization(&cmd, args, line, state, queue)
        }
    }

    /// Close-time handling: runs UPDATE work for graceful QUIT from
    /// TRANSACTION, releases the mailbox lock, and queues the
    /// farewell on every non-error path.
    pub fn handle_close(&mut self, flow: Flow, state: &Mutex<ServerState>, queue: &mut OutboundQueue) {
        if self.update && flow != Flow::Error {
            let maildir = lock_state(state).config.maildir.clone();
            if let Some(user) = self.username.as_deref() {
                for mail in self.mails.iter().filter(|m| m.deleted) {
                    if let Err(err) = maildir::remove_mail(&maildir, user, &mail.uid) {
                        warn!(user, uid = %mail.uid, %err, "failed to remove mail");
                    }
                }
            }
        }

        if self.authenticated {
            if let Some(user) = self.username.take() {
                lock_state(state).users.unlock(&user);
            }
        }
        self.mails.clear();

        if flow != Flow::Error {
            queue.push_bytes(*b"+OK Bye!\r\n");
        }
    }

    fn handle_authorization(
        &mut self,
        cmd: &str,
        args: &[&str],
        line: &str,
        state: &Mutex<ServerState>,
        queue: &mut OutboundQueue,
    ) -> Flow {
        if cmd == "QUIT" {
            return Flow::Close;
        }

        if self.username.is_some() {
            if cmd == "PASS" {
                if args.is_empty() {
                    queue.push_bytes(*b"-ERR Invalid number of arguments\r\n");
                    return Flow::Keep;
                }
                // Spaces are part of the password: take the raw
                // suffix after "PASS ", not the split tokens.
                let password = line.get(5..).unwrap_or_default().to_string();
                self.handle_pass(&password, state, queue);
                return Flow::Keep;
            }
            queue.push_bytes(*b"-ERR Expected PASS command\r\n");
            return Flow::Keep;
        }

        if cmd == "USER" {
            if args.len() != 1 {
                queue.push_bytes(*b"-ERR Invalid number of arguments\r\n");
                return Flow::Keep;
            }
            // Not checked against the registry; an unknown name only
            // surfaces as a PASS failure.
            self.username = Some(args[0].to_string());
            queue.push_bytes(*b"+OK\r\n");
            return Flow::Keep;
        }

        queue.push_bytes(*b"-ERR Invalid command\r\n");
        Flow::Keep
    }

    fn handle_pass(
        &mut self,
        password: &str,
        state: &Mutex<ServerState>,
        queue: &mut OutboundQueue,
    ) {
        let Some(username) = self.username.clone() else {
            queue.push_bytes(*b"-ERR Expected USER command\r\n");
            return;
        };

        let maildir = {
            let mut guard = lock_state(state);
            if !guard.users.verify(&username, password) {
                drop(guard);
                self.username = None;
                queue.push_bytes(*b"-ERR Invalid credentials\r\n");
                return;
            }
            if guard.users.is_locked(&username) {
                drop(guard);
                self.username = None;
                queue.push_bytes(*b"-ERR User mailbox in use\r\n");
                return;
            }
            if !guard.users.lock(&username) {
                drop(guard);
                self.username = None;
                queue.push_bytes(*b"-ERR Failed to lock mailbox\r\n");
                return;
            }
            guard.config.maildir.clone()
        };

        match maildir::load_mails(&maildir, &username) {
            Ok(mails) => {
                self.mails = mails;
                self.authenticated = true;
                queue.push_bytes(*b"+OK Logged in\r\n");
            }
            Err(err) => {
                warn!(user = %username, %err, "failed to load mails");
                lock_state(state).users.unlock(&username);
                self.username = None;
                queue.push_bytes(*b"-ERR Failed to load user mails\r\n");
            }
        }
    }

    fn handle_transaction(
        &mut self,
        cmd: &str,
        args: &[&str],
        _line: &str,
        state: &Mutex<ServerState>,
        queue: &mut OutboundQueue,
    ) -> Flow {
        match (cmd, args.len()) {
            ("NOOP", 0) => queue.push_bytes(*b"+OK Waiting for something to happen...\r\n"),
            ("STAT", 0) => {
                let (count, size) = self.stat();
                queue.push_bytes(format!("+OK {count} {size}\r\n"));
            }
            ("RSET", 0) => {
                for mail in &mut self.mails {
                    mail.deleted = false;
                }
                queue.push_bytes(*b"+OK Reversed deletes\r\n");
            }
            ("LIST", 0) => {
                let (count, size) = self.stat();
                let mut response = format!("+OK {count} messages ({size} octets)\r\n");
                for (n, mail) in self.live_mails() {
                    response.push_str(&format!("{n} {}\r\n", mail.size));
                }
                response.push_str(".\r\n");
                queue.push_bytes(response);
            }
            ("LIST", 1) => match self.find_mail(args[0]) {
                Ok(n) => {
                    queue.push_bytes(format!("+OK {n} {}\r\n", self.mails[n - 1].size));
                }
                Err(response) => queue.push_bytes(response),
            },
            ("UIDL", 0) => {
                let mut response = String::from("+OK\r\n");
                for (n, mail) in self.live_mails() {
                    // Mails without a proper uid prefix are silently
                    // left out of the listing.
                    if let Some(prefix) = uid_prefix(&mail.uid) {
                        response.push_str(&format!("{n} {prefix}\r\n"));
                    }
                }
                response.push_str(".\r\n");
                queue.push_bytes(response);
            }
            ("UIDL", 1) => match self.find_mail(args[0]) {
                Ok(n) => match uid_prefix(&self.mails[n - 1].uid) {
                    Some(prefix) => queue.push_bytes(format!("+OK {n} {prefix}\r\n")),
                    None => queue.push_bytes(*b"-ERR Internal error\r\n"),
                },
                Err(response) => queue.push_bytes(response),
            },
            ("DELE", 1) => match self.find_any_mail(args[0]) {
                Ok(n) if self.mails[n - 1].deleted => {
                    queue.push_bytes(*b"-ERR Message already deleted\r\n");
                }
                Ok(n) => {
                    self.mails[n - 1].deleted = true;
                    queue.push_bytes(*b"+OK Marked for deletion\r\n");
                }
                Err(response) => queue.push_bytes(response),
            },
            ("RETR", 1) => match self.find_mail(args[0]) {
                Ok(n) => self.handle_retr(n, state, queue),
                Err(response) => queue.push_bytes(response),
            },
            ("QUIT", 0) => {
                self.update = true;
                return Flow::Close;
            }
            ("NOOP" | "STAT" | "RSET" | "LIST" | "UIDL" | "DELE" | "RETR" | "QUIT", _) => {
                queue.push_bytes(*b"-ERR Invalid number of arguments\r\n");
            }
            _ => queue.push_bytes(*b"-ERR Invalid command\r\n"),
        }
        Flow::Keep
    }

    fn handle_retr(&self, n: usize, state: &Mutex<ServerState>, queue: &mut OutboundQueue) {
        let (maildir, transformer, bytestuffer) = {
            let guard = lock_state(state);
            (
                guard.config.maildir.clone(),
                guard.config.transformer.clone(),
                guard.config.bytestuffer.clone(),
            )
        };
        let Some(user) = self.username.as_deref() else {
            queue.push_bytes(*b"-ERR Internal error\r\n");
            return;
        };

        let path = maildir::mail_path(&maildir, user, &self.mails[n - 1].uid);
        match pipeline::spawn(&path, &transformer, &bytestuffer) {
            Ok(body) => {
                queue.push_bytes(*b"+OK\r\n");
                queue.attach_stream(Box::new(body));
                queue.push_bytes(*b"\r\n.\r\n");
            }
            Err(err) => {
                warn!(user, %err, "failed to spawn retrieval pipeline");
                queue.push_bytes(*b"-ERR Failed to open mail\r\n");
            }
        }
    }

    /// Count and total size over non-deleted mails.
    fn stat(&self) -> (usize, u64) {
        self.mails
            .iter()
            .filter(|m| !m.deleted)
            .fold((0, 0), |(count, size), m| (count + 1, size + m.size))
    }

    /// Non-deleted mails with their 1-based message numbers.
    fn live_mails(&self) -> impl Iterator<Item = (usize, &Mailfile)> {
        self.mails
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.deleted)
            .map(|(i, m)| (i + 1, m))
    }

    /// Resolve a message-number argument to a live mail.
    fn find_mail(&self, arg: &str) -> Result<usize, &'static [u8]> {
        let n = self.find_any_mail(arg)?;
        if self.mails[n - 1].deleted {
            return Err(b"-ERR Invalid message number\r\n");
        }
        Ok(n)
    }

    /// Resolve a message-number argument, deleted mails included.
    fn find_any_mail(&self, arg: &str) -> Result<usize, &'static [u8]> {
        match arg.parse::<usize>() {
            Ok(n) if (1..=self.mails.len()).contains(&n) => Ok(n),
            _ => Err(b"-ERR Invalid message number\r\n"),
        }
    }
}

impl Default for PopSession {
    fn default() -> Self {
        Self::new()
    }
}

/// The uid up to (but not including) the first `:`.
///
/// Maildir uids always carry a `:2,S` flag suffix; a uid without a
/// colon, or with nothing before it, has no usable prefix.
fn uid_prefix(uid: &str) -> Option<&str> {
    match uid.split_once(':') {
        Some((prefix, _)) if !prefix.is_empty() => Some(prefix),
        _ => None,
    }
}
