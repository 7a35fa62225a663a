//! Server configuration
//!
//! One owned value holds everything the two endpoints need: where to
//! listen, where the Maildirs live, and which external commands the
//! RETR pipeline runs. The manager protocol mutates the maildir root
//! and transformer at runtime, so the value lives inside the shared
//! server state rather than being read-only.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_POP_PORT: u16 = 110;
pub const DEFAULT_MANAGER_PORT: u16 = 4321;

#[derive(Debug, Clone)]
pub struct Config {
    /// POP3 listen address.
    pub pop_addr: SocketAddr,
    /// Manager listen address.
    pub manager_addr: SocketAddr,
    /// Root directory holding one Maildir per user.
    pub maildir: PathBuf,
    /// External transformation command applied to every RETR body.
    pub transformer: String,
    /// External byte-stuffing command producing POP3 wire framing.
    pub bytestuffer: String,
}

impl Default for Config {
    fn default() -> Self {
        // Unspecified IPv6 addresses; the listeners are opened
        // dual-stack so v4-mapped clients work too.
        Self {
            pop_addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), DEFAULT_POP_PORT),
            manager_addr: SocketAddr::new(
                IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                DEFAULT_MANAGER_PORT,
            ),
            maildir: PathBuf::from("./mail"),
            transformer: "cat".to_string(),
            bytestuffer: "bytestuff".to_string(),
        }
    }
}
