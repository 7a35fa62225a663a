//! In-memory user and admin registries
//!
//! Both registries are small bounded arrays with linear lookup. The
//! `locked` flag on a user record is the mutual-exclusion primitive
//! between POP3 sessions: it is set for exactly as long as one live
//! session is authenticated as that user.

use crate::error::{Error, Result};

pub const MAX_USERNAME_LEN: usize = 40;
pub const MAX_PASSWORD_LEN: usize = 256;
pub const MAX_USERS: usize = 110;
pub const MAX_ADMINS: usize = 4;

/// Whether `name` is acceptable as a mailbox owner.
///
/// Usernames double as Maildir directory names, so they must be
/// non-empty printable ASCII, at most [`MAX_USERNAME_LEN`] bytes,
/// must not begin with a dot and must not contain a slash.
#[must_use]
pub fn safe_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && !name.starts_with('.')
        && name.bytes().all(|b| b.is_ascii_graphic() && b != b'/')
}

fn valid_password(pass: &str) -> bool {
    !pass.is_empty() && pass.len() <= MAX_PASSWORD_LEN
}

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    password: String,
    locked: bool,
}

#[derive(Debug, Clone)]
pub struct Admin {
    pub username: String,
    password: String,
}

/// Outcome of an upsert: callers scaffold a Maildir only for new users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

#[derive(Debug, Default)]
pub struct UserRegistry {
    users: Vec<User>,
}

impl UserRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self { users: Vec::new() }
    }

    fn find(&self, username: &str) -> Option<usize> {
        self.users.iter().position(|u| u.username == username)
    }

    /// Create a user or replace an existing user's password.
    ///
    /// # Errors
    ///
    /// Rejects unsafe usernames, empty or oversized passwords, and
    /// creation beyond [`MAX_USERS`].
    pub fn upsert(&mut self, username: &str, password: &str) -> Result<Upsert> {
        if !safe_username(username) {
            return Err(Error::Registry(format!("invalid username: {username}")));
        }
        if !valid_password(password) {
            return Err(Error::Registry("invalid password".into()));
        }
        if let Some(i) = self.find(username) {
            self.users[i].password = password.to_string();
            return Ok(Upsert::Updated);
        }
        if self.users.len() >= MAX_USERS {
            return Err(Error::Registry("user registry full".into()));
        }
        self.users.push(User {
            username: username.to_string(),
            password: password.to_string(),
            locked: false,
        });
        Ok(Upsert::Created)
    }

    /// Remove a user. Refused while a session holds the mailbox.
    ///
    /// # Errors
    ///
    /// Fails for unknown users and for users whose mailbox is locked.
    pub fn remove(&mut self, username: &str) -> Result<()> {
        let Some(i) = self.find(username) else {
            return Err(Error::Registry(format!("no such user: {username}")));
        };
        if self.users[i].locked {
            return Err(Error::Registry(format!("user in use: {username}")));
        }
        self.users.remove(i);
        Ok(())
    }

    /// Check a username/password pair. Unknown user and wrong
    /// password are indistinguishable to the caller.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.find(username)
            .is_some_and(|i| self.users[i].password == password)
    }

    /// Acquire the mailbox lock. Fails if the user is unknown or the
    /// lock is already held.
    pub fn lock(&mut self, username: &str) -> bool {
        match self.find(username) {
            Some(i) if !self.users[i].locked => {
                self.users[i].locked = true;
                true
            }
            _ => false,
        }
    }

    /// Release the mailbox lock (idempotent).
    pub fn unlock(&mut self, username: &str) {
        if let Some(i) = self.find(username) {
            self.users[i].locked = false;
        }
    }

    #[must_use]
    pub fn is_locked(&self, username: &str) -> bool {
        self.find(username).is_some_and(|i| self.users[i].locked)
    }

    #[must_use]
    pub fn contains(&self, username: &str) -> bool {
        self.find(username).is_some()
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(|u| u.username.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AdminRegistry {
    admins: Vec<Admin>,
}

impl AdminRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self { admins: Vec::new() }
    }

    /// Create an admin or replace an existing admin's password.
    ///
    /// # Errors
    ///
    /// Rejects unsafe usernames, invalid passwords, and creation
    /// beyond [`MAX_ADMINS`].
    pub fn upsert(&mut self, username: &str, password: &str) -> Result<()> {
        if !safe_username(username) {
            return Err(Error::Registry(format!("invalid admin name: {username}")));
        }
        if !valid_password(password) {
            return Err(Error::Registry("invalid password".into()));
        }
        if let Some(admin) = self.admins.iter_mut().find(|a| a.username == username) {
            admin.password = password.to_string();
            return Ok(());
        }
        if self.admins.len() >= MAX_ADMINS {
            return Err(Error::Registry("admin registry full".into()));
        }
        self.admins.push(Admin {
            username: username.to_string(),
            password: password.to_string(),
        });
        Ok(())
    }

    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.admins
            .iter()
            .any(|a| a.username == username && a.password == password)
    }
}
