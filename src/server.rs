//! Listeners and the connection loop
//!
//! One accept loop multiplexes both endpoints; every accepted socket
//! gets its own task running the same drive loop: flush the outbound
//! queue, read, split into command lines, dispatch to the session.
//! Within a connection, reads are handled before writes resume and
//! response bytes leave in strict enqueue order; across connections
//! nothing blocks anything else.
//!
//! Close handling runs exactly once per connection. On a graceful
//! close the session's farewell is queued and drained before the
//! socket drops; an error close drops it as-is, which is also what
//! skips the POP3 UPDATE work.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::framing::LineBuffer;
use crate::manager::ManagerSession;
use crate::queue::OutboundQueue;
use crate::registry::{AdminRegistry, UserRegistry};
use crate::session::{Flow, PopSession};
use crate::stats::Stats;

/// Concurrent manager sessions allowed before rejecting at accept.
pub const MAX_MANAGER_SESSIONS: usize = 10;

/// Socket reads happen in chunks of at most this many bytes.
const READ_BUFFER: usize = 1024;

/// Everything the handlers share, behind one lock.
///
/// The lock is held only for synchronous bookkeeping, never across
/// an await.
pub struct ServerState {
    pub config: Config,
    pub users: UserRegistry,
    pub admins: AdminRegistry,
    pub stats: Stats,
    manager_sessions: usize,
}

impl ServerState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            users: UserRegistry::new(),
            admins: AdminRegistry::new(),
            stats: Stats::new(),
            manager_sessions: 0,
        }
    }

    fn try_acquire_manager_slot(&mut self) -> bool {
        if self.manager_sessions < MAX_MANAGER_SESSIONS {
            self.manager_sessions += 1;
            true
        } else {
            false
        }
    }

    fn release_manager_slot(&mut self) {
        self.manager_sessions = self.manager_sessions.saturating_sub(1);
    }
}

pub type SharedState = Arc<Mutex<ServerState>>;

/// Lock the shared state, surviving poisoning (a panicked handler
/// must not take the whole server down).
pub fn lock_state(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open a listener with `SO_REUSEADDR`; IPv6 sockets are opened
/// dual-stack so v4-mapped clients connect too.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .map_err(|err| Error::Addr(format!("{addr}: {err}")))?;
    socket.listen(128)?;
    Ok(TcpListener::from_std(socket.into())?)
}

/// The two bound endpoints, ready to serve.
pub struct Server {
    pop_listener: TcpListener,
    manager_listener: TcpListener,
    state: SharedState,
}

impl Server {
    /// Bind both listeners using the addresses in the shared state's
    /// configuration.
    ///
    /// # Errors
    ///
    /// Fails if either address cannot be bound.
    pub fn bind(state: SharedState) -> Result<Self> {
        let (pop_addr, manager_addr) = {
            let guard = lock_state(&state);
            (guard.config.pop_addr, guard.config.manager_addr)
        };
        Ok(Self {
            pop_listener: bind_listener(pop_addr)?,
            manager_listener: bind_listener(manager_addr)?,
            state,
        })
    }

    /// Actual POP3 listen address (useful after binding port 0).
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn pop_addr(&self) -> Result<SocketAddr> {
        Ok(self.pop_listener.local_addr()?)
    }

    /// Actual manager listen address.
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn manager_addr(&self) -> Result<SocketAddr> {
        Ok(self.manager_listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// In-flight sessions are not drained on shutdown; their sockets
    /// go away with the process.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("server running");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested");
                    break;
                }
                accepted = self.pop_listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_pop(stream, peer),
                    Err(err) => warn!(%err, "pop3 accept failed"),
                },
                accepted = self.manager_listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_manager(stream, peer),
                    Err(err) => warn!(%err, "manager accept failed"),
                },
            }
        }
    }

    fn spawn_pop(&self, stream: TcpStream, peer: SocketAddr) {
        let state = Arc::clone(&self.state);
        debug!(%peer, "pop3 connection");
        tokio::spawn(async move {
            let mut session = PopSession::new();
            let mut queue = OutboundQueue::new();
            PopSession::greet(&mut queue);
            drive(&mut session, stream, peer, &state, &mut queue).await;
        });
    }

    fn spawn_manager(&self, stream: TcpStream, peer: SocketAddr) {
        let state = Arc::clone(&self.state);
        if !lock_state(&state).try_acquire_manager_slot() {
            // At capacity: no greeting, the socket just drops.
            warn!(%peer, "manager connection rejected at capacity");
            drop(stream);
            return;
        }
        debug!(%peer, "manager connection");
        tokio::spawn(async move {
            let mut session = ManagerSession::new();
            let mut queue = OutboundQueue::new();
            ManagerSession::greet(&mut queue);
            drive(&mut session, stream, peer, &state, &mut queue).await;
            lock_state(&state).release_manager_slot();
        });
    }
}

/// What the drive loop needs from either protocol machine.
trait ProtocolSession {
    fn dispatch(&mut self, line: &str, state: &Mutex<ServerState>, queue: &mut OutboundQueue)
    -> Flow;
    fn close(&mut self, flow: Flow, state: &Mutex<ServerState>, queue: &mut OutboundQueue);
    fn user(&self) -> Option<&str>;
}

impl ProtocolSession for PopSession {
    fn dispatch(
        &mut self,
        line: &str,
        state: &Mutex<ServerState>,
        queue: &mut OutboundQueue,
    ) -> Flow {
        self.handle_line(line, state, queue)
    }

    fn close(&mut self, flow: Flow, state: &Mutex<ServerState>, queue: &mut OutboundQueue) {
        self.handle_close(flow, state, queue);
    }

    fn user(&self) -> Option<&str> {
        self.username()
    }
}

impl ProtocolSession for ManagerSession {
    fn dispatch(
        &mut self,
        line: &str,
        state: &Mutex<ServerState>,
        queue: &mut OutboundQueue,
    ) -> Flow {
        self.handle_line(line, state, queue)
    }

    fn close(&mut self, flow: Flow, _state: &Mutex<ServerState>, queue: &mut OutboundQueue) {
        self.handle_close(flow, queue);
    }

    fn user(&self) -> Option<&str> {
        self.username()
    }
}

/// Drive one connection to completion.
///
/// The loop alternates draining the outbound queue and reading more
/// input; handlers run synchronously between the two, so per-FD
/// ordering is exactly enqueue order with streamed bodies interleaved
/// at their attach position. Close handling runs once, with the
/// farewell drained before the socket drops.
async fn drive<S: ProtocolSession>(
    session: &mut S,
    mut stream: TcpStream,
    peer: SocketAddr,
    state: &SharedState,
    queue: &mut OutboundQueue,
) {
    let ip = peer.ip().to_string();
    lock_state(state).stats.log_connect(&ip, None);

    let mut lines = LineBuffer::new();
    let mut buf = [0u8; READ_BUFFER];

    let flow = loop {
        match queue.drain(&mut stream).await {
            Ok((_, written)) if written > 0 => {
                lock_state(state).stats.log_bytes(&ip, session.user(), written);
            }
            Ok(_) => {}
            Err(err) => {
                debug!(%err, "write failed");
                break Flow::Error;
            }
        }

        let read = match stream.read(&mut buf).await {
            Ok(0) => break Flow::Error,
            Ok(n) => n,
            Err(err) => {
                debug!(%err, "read failed");
                break Flow::Error;
            }
        };

        let commands = match lines.feed(&buf[..read]) {
            Ok(commands) => commands,
            Err(_) => {
                debug!("command line overflow");
                break Flow::Error;
            }
        };

        let mut next = Flow::Keep;
        for command in &commands {
            next = session.dispatch(command, state, queue);
            if next != Flow::Keep {
                break;
            }
        }
        if next != Flow::Keep {
            break next;
        }
    };

    let username = session.user().map(ToString::to_string);
    session.close(flow, state, queue);
    queue.push_close();
    if let Ok((_, written)) = queue.drain(&mut stream).await {
        if written > 0 {
            lock_state(state)
                .stats
                .log_bytes(&ip, username.as_deref(), written);
        }
    }
    lock_state(state)
        .stats
        .log_disconnect(&ip, username.as_deref());
}
