#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Concurrent POP3 server library
//!
//! A single process serves mail clients over POP3 (RFC 1939) and
//! administrators over a management protocol with the same framing,
//! backed by per-user Maildirs. Message bodies stream through an
//! external transformation pipeline without ever being buffered
//! whole, and per-user mailbox locking keeps sessions exclusive.

mod config;
mod error;
mod framing;
pub mod maildir;
mod manager;
mod pipeline;
mod queue;
mod registry;
mod server;
mod session;
mod stats;
mod stuffer;

pub use config::{Config, DEFAULT_MANAGER_PORT, DEFAULT_POP_PORT};
pub use error::{Error, Result};
pub use registry::{AdminRegistry, Upsert, UserRegistry};
pub use server::{MAX_MANAGER_SESSIONS, Server, ServerState, SharedState, lock_state};
pub use stats::{Counters, Event, EventKind, Stats};
pub use stuffer::{Stuffer, stuff};
