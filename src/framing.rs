//! CRLF command framing
//!
//! Both protocol endpoints speak CRLF-delimited ASCII command lines.
//! Inbound bytes are accumulated per session and split at each CRLF;
//! whatever trails the last CRLF is carried over to the next read.
//! A client that accumulates more than [`MAX_COMMAND_LINE`] bytes
//! without a terminator is a protocol violation and loses the
//! connection.

/// Maximum assembled command line, terminator included.
pub const MAX_COMMAND_LINE: usize = 1024;

/// The undispatched prefix grew past [`MAX_COMMAND_LINE`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOverflow;

/// Accumulates partial command text across reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed one chunk of inbound bytes.
    ///
    /// Returns the complete command lines found, CRLF stripped, in
    /// arrival order. Bytes after the last CRLF stay buffered.
    ///
    /// # Errors
    ///
    /// Returns [`FrameOverflow`] once the buffered prefix exceeds
    /// [`MAX_COMMAND_LINE`] bytes; the connection must be dropped.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>, FrameOverflow> {
        let mut lines = Vec::new();
        for &byte in bytes {
            self.buf.push(byte);
            if self.buf.len() > MAX_COMMAND_LINE {
                return Err(FrameOverflow);
            }
            if byte == b'\n' && self.buf.len() >= 2 && self.buf[self.buf.len() - 2] == b'\r' {
                let line = &self.buf[..self.buf.len() - 2];
                lines.push(String::from_utf8_lossy(line).into_owned());
                self.buf.clear();
            }
        }
        Ok(lines)
    }
}
