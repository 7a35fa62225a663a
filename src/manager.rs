//! Management session state machine
//!
//! The manager endpoint speaks the same CRLF framing and `+OK`/`-ERR`
//! replies as POP3, authenticates against the admin registry, and
//! exposes runtime configuration instead of mailboxes: the maildir
//! root and transformer command can be read and replaced, and users
//! can be added or removed while the server runs.

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::maildir;
use crate::queue::OutboundQueue;
use crate::server::{ServerState, lock_state};
use crate::session::Flow;

pub struct ManagerSession {
    username: Option<String>,
    authenticated: bool,
}

impl ManagerSession {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            username: None,
            authenticated: false,
        }
    }

    /// Queue the manager greeting.
    pub fn greet(queue: &mut OutboundQueue) {
        queue.push_bytes(*b"+OK Manager ready\r\n");
    }

    /// The authenticated admin name, if any.
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
        let tokens: Vec<&str> = line.split(' ').collect();
        let cmd = tokens[0].to_ascii_uppercase();
        let args = &tokens[1..];
        debug!(cmd = %cmd, argc = args.len(), "manager command");

        if self.authenticated {
            self.handle_command(&cmd, args, &tokens, line, state, queue)
        } else {
            self.handle_authorization(&cmd, args, line, state, queue)
        }
    }

    /// Queue the farewell on non-error closes. The manager holds no
    /// locks, so there is no other close-time work.
    pub fn handle_close(&mut self, flow: Flow, queue: &mut OutboundQueue) {
        self.username = None;
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

        if let Some(username) = self.username.clone() {
            if cmd == "PASS" {
                if args.is_empty() {
                    queue.push_bytes(*b"-ERR Invalid number of arguments\r\n");
                    return Flow::Keep;
                }
                let password = line.get(5..).unwrap_or_default();
                if lock_state(state).admins.verify(&username, password) {
                    self.authenticated = true;
                    queue.push_bytes(*b"+OK Logged in\r\n");
                } else {
                    self.username = None;
                    queue.push_bytes(*b"-ERR Invalid credentials\r\n");
                }
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
            self.username = Some(args[0].to_string());
            queue.push_bytes(*b"+OK\r\n");
            return Flow::Keep;
        }

        queue.push_bytes(*b"-ERR Invalid command\r\n");
        Flow::Keep
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_command(
        &mut self,
        cmd: &str,
        args: &[&str],
        tokens: &[&str],
        line: &str,
        state: &Mutex<ServerState>,
        queue: &mut OutboundQueue,
    ) -> Flow {
        match (cmd, args.len()) {
            ("GET", 1) => match args[0] {
                "maildir" => {
                    let maildir = lock_state(state).config.maildir.clone();
                    queue.push_bytes(format!("+OK {}\r\n", maildir.display()));
                }
                "transformer" => {
                    let transformer = lock_state(state).config.transformer.clone();
                    queue.push_bytes(format!("+OK {transformer}\r\n"));
                }
                _ => queue.push_bytes(*b"-ERR Unknown setting\r\n"),
            },
            ("SET", n) if n >= 2 => {
                // The value is the verbatim rest of the line so paths
                // and commands may contain spaces.
                let skip = tokens[0].len() + 1 + tokens[1].len() + 1;
                let value = line.get(skip..).unwrap_or_default();
                handle_set(tokens[1], value, state, queue);
            }
            ("ADD", 2) => handle_add(args[0], args[1], state, queue),
            ("DELE", 1) => {
                let mut guard = lock_state(state);
                if !guard.users.contains(args[0]) {
                    queue.push_bytes(*b"-ERR No such user\r\n");
                } else if guard.users.is_locked(args[0]) {
                    queue.push_bytes(*b"-ERR User mailbox in use\r\n");
                } else if guard.users.remove(args[0]).is_ok() {
                    queue.push_bytes(*b"+OK\r\n");
                } else {
                    queue.push_bytes(*b"-ERR Failed to remove user\r\n");
                }
            }
            ("QUIT", 0) => return Flow::Close,
            ("GET" | "SET" | "ADD" | "DELE" | "QUIT", _) => {
                queue.push_bytes(*b"-ERR Invalid number of arguments\r\n");
            }
            _ => queue.push_bytes(*b"-ERR Invalid command\r\n"),
        }
        Flow::Keep
    }
}

fn handle_set(key: &str, value: &str, state: &Mutex<ServerState>, queue: &mut OutboundQueue) {
    if value.is_empty() {
        queue.push_bytes(*b"-ERR Invalid number of arguments\r\n");
        return;
    }
    match key {
        "maildir" => {
            let root = std::path::PathBuf::from(value);
            let users: Vec<String> = {
                let guard = lock_state(state);
                guard.users.usernames().map(ToString::to_string).collect()
            };
            match migrate_maildir(&root, &users) {
                Ok(()) => {
                    lock_state(state).config.maildir = root;
                    queue.push_bytes(*b"+OK\r\n");
                }
                Err(err) => {
                    warn!(%err, "maildir migration failed");
                    queue.push_bytes(*b"-ERR Failed to set maildir\r\n");
                }
            }
        }
        "transformer" => {
            lock_state(state).config.transformer = value.to_string();
            queue.push_bytes(*b"+OK\r\n");
        }
        _ => queue.push_bytes(*b"-ERR Unknown setting\r\n"),
    }
}

/// Create the new root and re-scaffold every registered user's
/// Maildir skeleton under it. Existing mail files stay where they
/// are.
fn migrate_maildir(root: &std::path::Path, users: &[String]) -> std::io::Result<()> {
    maildir::ensure_root(root)?;
    for user in users {
        maildir::scaffold(root, user)?;
    }
    Ok(())
}

fn handle_add(username: &str, password: &str, state: &Mutex<ServerState>, queue: &mut OutboundQueue) {
    use crate::registry::Upsert;

    let (outcome, maildir) = {
        let mut guard = lock_state(state);
        let outcome = guard.users.upsert(username, password);
        (outcome, guard.config.maildir.clone())
    };
    match outcome {
        Ok(Upsert::Created) => {
            if let Err(err) = maildir::scaffold(&maildir, username) {
                warn!(username, %err, "failed to scaffold maildir");
                lock_state(state).users.remove(username).ok();
                queue.push_bytes(*b"-ERR Failed to create maildir\r\n");
            } else {
                queue.push_bytes(*b"+OK\r\n");
            }
        }
        Ok(Upsert::Updated) => queue.push_bytes(*b"+OK\r\n"),
        Err(err) => {
            debug!(username, %err, "rejected user");
            queue.push_bytes(*b"-ERR Invalid user or password\r\n");
        }
    }
}

impl Default for ManagerSession {
    fn default() -> Self {
        Self::new()
    }
}
