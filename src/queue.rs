//! Per-connection outbound queue
//!
//! Responses are not written to the socket directly; they are queued
//! as [`Datum`] nodes and drained in strict FIFO order. A `Splitter`
//! node embeds a readable source (the stuffer pipe of a RETR, or any
//! async reader) whose bytes are transmitted exactly at the node's
//! queue position, so replies enqueued after a body attach are
//! delivered after every byte the source yields. An `Esc` node marks
//! a graceful close: once drained up to it, the connection is done
//! and the queue accepts nothing further.

use std::collections::VecDeque;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Streamed sources are read in chunks of this many bytes.
const SPLITTER_CHUNK: usize = 512;

/// A boxed async byte source feeding a splitter node.
pub type Source = Box<dyn AsyncRead + Send + Unpin>;

enum Datum {
    Raw { buf: Vec<u8>, offset: usize },
    Splitter { source: Source, drained: bool },
    Esc,
}

/// Outcome of fully draining the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
    /// The queue emptied without reaching an `Esc` node.
    Empty,
    /// An `Esc` node was reached; close the connection.
    Close,
}

#[derive(Default)]
pub struct OutboundQueue {
    nodes: VecDeque<Datum>,
    frozen: bool,
}

impl OutboundQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append an owned byte buffer. Ignored once the queue is frozen.
    pub fn push_bytes(&mut self, bytes: impl Into<Vec<u8>>) {
        if self.frozen {
            return;
        }
        self.nodes.push_back(Datum::Raw {
            buf: bytes.into(),
            offset: 0,
        });
    }

    /// Append a splitter fed by `source`.
    ///
    /// Bytes pushed after this call are transmitted only once the
    /// source is exhausted. Splitters never nest: a source is a flat
    /// byte stream, not another queue.
    pub fn attach_stream(&mut self, source: Source) {
        if self.frozen {
            return;
        }
        self.nodes.push_back(Datum::Splitter {
            source,
            drained: false,
        });
    }

    /// Append the graceful-close marker and freeze the queue.
    pub fn push_close(&mut self) {
        if self.frozen {
            return;
        }
        self.nodes.push_back(Datum::Esc);
        self.frozen = true;
    }

    /// Write queued data to `writer` until the queue is empty or the
    /// close marker is reached.
    ///
    /// Returns the drain outcome and the number of payload bytes
    /// written. A splitter source that hits EOF or a read error is
    /// considered drained (the body is truncated, the connection
    /// survives); a *write* error is a transport failure and
    /// propagates.
    ///
    /// # Errors
    ///
    /// Returns any error from writing to (or flushing) `writer`.
    pub async fn drain<W>(&mut self, writer: &mut W) -> io::Result<(Drained, u64)>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written: u64 = 0;
        let outcome = loop {
            let Some(head) = self.nodes.front_mut() else {
                break Drained::Empty;
            };
            match head {
                Datum::Raw { buf, offset } => {
                    while *offset < buf.len() {
                        let n = writer.write(&buf[*offset..]).await?;
                        if n == 0 {
                            return Err(io::ErrorKind::WriteZero.into());
                        }
                        *offset += n;
                        written += n as u64;
                    }
                    self.nodes.pop_front();
                }
                Datum::Splitter { source, drained } => {
                    let mut chunk = [0u8; SPLITTER_CHUNK];
                    match source.read(&mut chunk).await {
                        Ok(0) | Err(_) => *drained = true,
                        Ok(n) => {
                            writer.write_all(&chunk[..n]).await?;
                            written += n as u64;
                        }
                    }
                    if *drained {
                        self.nodes.pop_front();
                    }
                }
                Datum::Esc => {
                    self.nodes.pop_front();
                    break Drained::Close;
                }
            }
        };
        writer.flush().await?;
        Ok((outcome, written))
    }
}
