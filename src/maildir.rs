//! Maildir filesystem operations
//!
//! Each user owns `<root>/<user>/{new,cur,tmp}` created mode 0700.
//! Logging in moves everything from `new/` into `cur/` with the
//! Maildir seen suffix `:2,S`, then the session works exclusively on
//! `cur/`. The file name is the message UID.

use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Maildir "seen" flag suffix appended when a message moves to cur/.
pub const SEEN_SUFFIX: &str = ":2,S";

/// Upper bound on messages loaded per session.
pub const MAX_MAILS: usize = 4096;

/// One message as seen by a session.
///
/// The 1-based position in the session's mail list is the POP3
/// message number; it never changes while the session lives, deleted
/// or not.
#[derive(Debug, Clone)]
pub struct Mailfile {
    /// File name under `cur/`, doubling as the unique id.
    pub uid: String,
    /// Marked for removal at UPDATE.
    pub deleted: bool,
    /// Size in bytes.
    pub size: u64,
}

fn mkdir_0700(path: &Path) -> io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

/// Create the maildir root itself, mode 0700.
///
/// # Errors
///
/// Returns the underlying filesystem error.
pub fn ensure_root(root: &Path) -> io::Result<()> {
    mkdir_0700(root)
}

/// Create `<root>/<user>/{new,cur,tmp}` (and the root itself) as
/// needed, all mode 0700.
///
/// # Errors
///
/// Returns the underlying filesystem error.
pub fn scaffold(root: &Path, user: &str) -> io::Result<()> {
    let base = root.join(user);
    for sub in ["new", "cur", "tmp"] {
        mkdir_0700(&base.join(sub))?;
    }
    Ok(())
}

/// Path of a message file inside the user's `cur/`.
#[must_use]
pub fn mail_path(root: &Path, user: &str, uid: &str) -> PathBuf {
    root.join(user).join("cur").join(uid)
}

/// Load the user's mail list for a new session.
///
/// Every entry in `new/` is renamed into `cur/` with the
/// [`SEEN_SUFFIX`], then `cur/` is scanned (sorted by name so message
/// numbering is stable across runs) up to [`MAX_MAILS`] entries.
///
/// # Errors
///
/// Returns the underlying filesystem error; the caller surfaces it
/// as a failed login.
pub fn load_mails(root: &Path, user: &str) -> io::Result<Vec<Mailfile>> {
    let base = root.join(user);
    let new_dir = base.join("new");
    let cur_dir = base.join("cur");

    for entry in fs::read_dir(&new_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!(user, "skipping non-UTF8 mail file name");
            continue;
        };
        fs::rename(entry.path(), cur_dir.join(format!("{name}{SEEN_SUFFIX}")))?;
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(&cur_dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        names.push((name, entry.metadata()?.len()));
        if names.len() >= MAX_MAILS {
            break;
        }
    }
    names.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    Ok(names
        .into_iter()
        .map(|(uid, size)| Mailfile {
            uid,
            deleted: false,
            size,
        })
        .collect())
}

/// Remove one message file from `cur/` (UPDATE state).
///
/// # Errors
///
/// Returns the underlying filesystem error.
pub fn remove_mail(root: &Path, user: &str, uid: &str) -> io::Result<()> {
    fs::remove_file(mail_path(root, user, uid))
}
