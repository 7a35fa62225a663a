#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! POP3 + management server binary

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use clap::Parser;
use popd::{Config, Server, ServerState, maildir};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MAX_CLI_USERS: usize = 10;
const MAX_CLI_ADMINS: usize = 4;

#[derive(Parser)]
#[command(name = "popd", version)]
#[command(about = "Concurrent POP3 server with a Maildir backend")]
#[command(disable_version_flag = true)]
struct Args {
    /// POP3 listen address
    #[arg(short = 'l', value_name = "IP", default_value = "::")]
    pop_address: IpAddr,

    /// Manager listen address
    #[arg(short = 'L', value_name = "IP", default_value = "::")]
    manager_address: IpAddr,

    /// POP3 listen port
    #[arg(short = 'p', value_name = "PORT", default_value_t = popd::DEFAULT_POP_PORT)]
    pop_port: u16,

    /// Manager listen port
    #[arg(short = 'P', value_name = "PORT", default_value_t = popd::DEFAULT_MANAGER_PORT)]
    manager_port: u16,

    /// Directory holding the per-user Maildirs
    #[arg(short = 'd', value_name = "DIR", default_value = "./mail")]
    maildir: PathBuf,

    /// Transformation command applied to retrieved mail bodies
    #[arg(short = 't', value_name = "CMD", default_value = "cat")]
    transformer: String,

    /// Byte-stuffing command producing POP3 wire framing
    #[arg(short = 's', value_name = "CMD", default_value = "bytestuff")]
    bytestuffer: String,

    /// Mail user as <name>:<password> (repeatable, up to 10)
    #[arg(short = 'u', value_name = "USER:PASS")]
    user: Vec<String>,

    /// Administrator as <name>:<password> (repeatable, up to 4)
    #[arg(short = 'a', value_name = "ADMIN:PASS")]
    admin: Vec<String>,

    /// Print version information and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn split_credentials(input: &str) -> anyhow::Result<(&str, &str)> {
    input
        .split_once(':')
        .with_context(|| format!("expected <name>:<password>, got {input:?}"))
}

fn build_state(args: &Args) -> anyhow::Result<ServerState> {
    if args.user.len() > MAX_CLI_USERS {
        bail!("at most {MAX_CLI_USERS} users may be given with -u");
    }
    if args.admin.len() > MAX_CLI_ADMINS {
        bail!("at most {MAX_CLI_ADMINS} admins may be given with -a");
    }

    let config = Config {
        pop_addr: SocketAddr::new(args.pop_address, args.pop_port),
        manager_addr: SocketAddr::new(args.manager_address, args.manager_port),
        maildir: args.maildir.clone(),
        transformer: args.transformer.clone(),
        bytestuffer: args.bytestuffer.clone(),
    };

    let mut state = ServerState::new(config);

    maildir::ensure_root(&args.maildir)
        .with_context(|| format!("creating maildir root {}", args.maildir.display()))?;
    for entry in &args.user {
        let (name, password) = split_credentials(entry)?;
        state
            .users
            .upsert(name, password)
            .with_context(|| format!("adding user {name}"))?;
        maildir::scaffold(&args.maildir, name)
            .with_context(|| format!("creating maildir for {name}"))?;
    }
    for entry in &args.admin {
        let (name, password) = split_credentials(entry)?;
        state
            .admins
            .upsert(name, password)
            .with_context(|| format!("adding admin {name}"))?;
    }

    Ok(state)
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!(%err, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let state = build_state(&args)?;

    let server = Server::bind(Arc::new(Mutex::new(state)))?;
    info!(
        pop = %server.pop_addr()?,
        manager = %server.manager_addr()?,
        "listening"
    );

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("signal received, shutting down");
        tx.send(true).ok();
    });

    server.run(rx).await;
    Ok(())
}
