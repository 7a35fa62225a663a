//! Activity statistics
//!
//! Write-only from the server's point of view: connection handling
//! calls the `log_*` hooks and never reads anything back. Reads
//! (snapshot, per-user history) exist for operator tooling and are
//! not on the critical path.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Events kept in the in-memory ring.
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub ip: String,
    pub username: Option<String>,
    pub at: DateTime<Utc>,
}

/// Aggregate counters, cheap to copy out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub current_connections: u64,
    pub historic_connections: u64,
    pub max_concurrent: u64,
    pub transferred_bytes: u64,
}

#[derive(Debug, Default)]
pub struct Stats {
    counters: Counters,
    events: VecDeque<Event>,
}

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, kind: EventKind, ip: &str, username: Option<&str>) {
        if self.events.len() == EVENT_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(Event {
            kind,
            ip: ip.to_string(),
            username: username.map(ToString::to_string),
            at: Utc::now(),
        });
    }

    pub fn log_connect(&mut self, ip: &str, username: Option<&str>) {
        self.counters.current_connections += 1;
        self.counters.historic_connections += 1;
        self.counters.max_concurrent = self
            .counters
            .max_concurrent
            .max(self.counters.current_connections);
        self.record(EventKind::Connect, ip, username);
    }

    pub fn log_disconnect(&mut self, ip: &str, username: Option<&str>) {
        self.counters.current_connections = self.counters.current_connections.saturating_sub(1);
        self.record(EventKind::Disconnect, ip, username);
    }

    pub fn log_bytes(&mut self, _ip: &str, _username: Option<&str>, count: u64) {
        self.counters.transferred_bytes += count;
    }

    #[must_use]
    pub const fn snapshot(&self) -> Counters {
        self.counters
    }

    /// Most recent events, oldest first, at most `limit`.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Events attributed to one user, oldest first.
    #[must_use]
    pub fn user_events(&self, username: &str) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| e.username.as_deref() == Some(username))
            .cloned()
            .collect()
    }
}
