//! POP3 byte-stuffing filter
//!
//! Reads an arbitrary octet stream on stdin and writes the POP3
//! multi-line form on stdout: CRLF line endings, dot-stuffed lines.
//! No arguments; exits non-zero on any stdio failure.

use std::io::{self, Read, Write};
use std::process::ExitCode;

use popd::Stuffer;

fn run() -> io::Result<()> {
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut stuffer = Stuffer::new();
    let mut buf = [0u8; 4096];
    let mut out = Vec::with_capacity(2 * buf.len());

    loop {
        let read = stdin.read(&mut buf)?;
        if read == 0 {
            break;
        }
        out.clear();
        stuffer.push(&buf[..read], &mut out);
        stdout.write_all(&out)?;
        // Flush per chunk so a consumer sees lines as they stream.
        stdout.flush()?;
    }
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("bytestuff: {err}");
            ExitCode::FAILURE
        }
    }
}
