//! RETR transformation pipeline
//!
//! A retrieved message is never written to the socket directly. Its
//! file feeds an external transformer command whose output feeds the
//! external byte-stuffer, and the server reads the stuffer's stdout:
//!
//! ```text
//! mail file -> transformer stdin | transformer stdout -> stuffer stdin | stuffer stdout -> server
//! ```
//!
//! The parent keeps only the final read end; every other pipe end
//! belongs to a child, so EOF propagates and nothing deadlocks on a
//! forgotten writer. Children are awaited by detached tasks, which is
//! how the runtime reaps them.

use std::fs::File;
use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{ChildStdout, Command};
use tracing::debug;

/// Split a configured command string into program and arguments.
///
/// Plain whitespace splitting; quoting is not supported.
fn command(cmd: &str) -> io::Result<Command> {
    let mut parts = cmd.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
    let mut command = Command::new(program);
    command.args(parts);
    Ok(command)
}

/// Spawn the transformation pipeline for one mail file.
///
/// Returns the read end of the final pipe: the POP3-framed body,
/// ready to stream. Both children's exits are awaited in background
/// tasks so no zombies accumulate.
///
/// # Errors
///
/// Fails if the mail file cannot be opened or either child cannot be
/// spawned.
pub fn spawn(path: &Path, transformer: &str, bytestuffer: &str) -> io::Result<ChildStdout> {
    let mail = File::open(path)?;

    let mut transform = command(transformer)?
        .stdin(Stdio::from(mail))
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let transformed = transform
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("transformer stdout missing"))?;

    let mut stuff = command(bytestuffer)?
        .stdin(Stdio::from(transformed.into_owned_fd()?))
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let body = stuff
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stuffer stdout missing"))?;

    debug!(?path, transformer, bytestuffer, "spawned retrieval pipeline");

    tokio::spawn(async move {
        let _ = transform.wait().await;
    });
    tokio::spawn(async move {
        let _ = stuff.wait().await;
    });

    Ok(body)
}
