#![allow(dead_code)]

//! Shared fixtures for the end-to-end tests.
//!
//! `ServerBuilder` seeds users, admins, and mail files into a
//! temporary maildir, then starts a real server on OS-assigned
//! ports. `Client` is a thin CRLF line client over `TcpStream`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use popd::{Config, Server, ServerState, SharedState, maildir};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

pub struct ServerBuilder {
    users: Vec<(String, String)>,
    admins: Vec<(String, String)>,
    mails: Vec<(String, String, Vec<u8>)>,
    transformer: String,
    bytestuffer: String,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            users: Vec::new(),
            admins: Vec::new(),
            mails: Vec::new(),
            transformer: "cat".to_string(),
            bytestuffer: env!("CARGO_BIN_EXE_bytestuff").to_string(),
        }
    }

    pub fn user(mut self, name: &str, password: &str) -> Self {
        self.users.push((name.to_string(), password.to_string()));
        self
    }

    pub fn admin(mut self, name: &str, password: &str) -> Self {
        self.admins.push((name.to_string(), password.to_string()));
        self
    }

    /// Drop a mail file into the user's `new/` directory.
    pub fn mail(mut self, user: &str, name: &str, content: &[u8]) -> Self {
        self.mails
            .push((user.to_string(), name.to_string(), content.to_vec()));
        self
    }

    pub fn transformer(mut self, cmd: &str) -> Self {
        self.transformer = cmd.to_string();
        self
    }

    pub async fn start(self) -> TestServer {
        let dir = tempfile::tempdir().expect("create tempdir");

        let config = Config {
            pop_addr: "127.0.0.1:0".parse().unwrap(),
            manager_addr: "127.0.0.1:0".parse().unwrap(),
            maildir: dir.path().to_path_buf(),
            transformer: self.transformer,
            bytestuffer: self.bytestuffer,
        };

        let mut state = ServerState::new(config);
        for (name, password) in &self.users {
            state.users.upsert(name, password).expect("seed user");
            maildir::scaffold(dir.path(), name).expect("scaffold maildir");
        }
        for (name, password) in &self.admins {
            state.admins.upsert(name, password).expect("seed admin");
        }
        for (user, name, content) in &self.mails {
            std::fs::write(dir.path().join(user).join("new").join(name), content)
                .expect("write mail file");
        }

        let state: SharedState = Arc::new(Mutex::new(state));
        let server = Server::bind(Arc::clone(&state)).expect("bind server");
        let pop_addr = server.pop_addr().unwrap();
        let manager_addr = server.manager_addr().unwrap();

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(rx));

        TestServer {
            pop_addr,
            manager_addr,
            state,
            maildir: dir,
            _shutdown: shutdown,
            _handle: handle,
        }
    }
}

pub struct TestServer {
    pub pop_addr: SocketAddr,
    pub manager_addr: SocketAddr,
    pub state: SharedState,
    pub maildir: TempDir,
    _shutdown: watch::Sender<bool>,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn pop_client(&self) -> Client {
        Client::connect(self.pop_addr).await
    }

    pub async fn manager_client(&self) -> Client {
        Client::connect(self.manager_addr).await
    }

    /// Path of a message inside a user's `cur/`.
    pub fn cur_path(&self, user: &str, uid: &str) -> std::path::PathBuf {
        self.maildir.path().join(user).join("cur").join(uid)
    }
}

pub struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Send one command line (CRLF appended).
    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\r\n").as_bytes()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream
            .get_mut()
            .write_all(bytes)
            .await
            .expect("write");
        self.stream.get_mut().flush().await.expect("flush");
    }

    /// Read one response line, CRLF stripped. Panics on EOF.
    pub async fn line(&mut self) -> String {
        self.try_line().await.expect("connection closed")
    }

    /// Read one response line, or `None` once the peer closed.
    pub async fn try_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = self.stream.read_line(&mut line).await.ok()?;
        if read == 0 {
            return None;
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    /// Send a command and assert the next response line.
    pub async fn expect(&mut self, command: &str, want: &str) {
        self.send(command).await;
        let got = self.line().await;
        assert_eq!(got, want, "response to {command:?}");
    }

    /// Read the remaining lines of a multi-line response up to and
    /// excluding the lone-dot terminator.
    pub async fn read_until_dot(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            if line == "." {
                return lines;
            }
            lines.push(line);
        }
    }

    /// Read raw bytes until the multi-line terminator `CRLF . CRLF`
    /// and return the body without it.
    pub async fn read_body(&mut self) -> Vec<u8> {
        let mut body = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.stream.read_exact(&mut byte).await.expect("body byte");
            body.push(byte[0]);
            if body.ends_with(b"\r\n.\r\n") {
                body.truncate(body.len() - 5);
                return body;
            }
        }
    }

    /// True once the server has closed the connection (EOF or reset).
    pub async fn closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(self.stream.read(&mut byte).await, Ok(0) | Err(_))
    }
}
