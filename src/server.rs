//! One-shot HTTP/1.1 server exposing a single archive.
//!
//! The accept loop runs on its own task; the first request whose response
//! body was streamed (or broke mid-stream) ends the session, after which the
//! archive is deleted.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::logger::{Logger, NoopLogger};
use crate::url::translate_path;

/// Whole request head must arrive within this window
const REQUEST_HEAD_MS: u64 = 10_000;
const MAX_HEAD_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Serving,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    Completed { peer: SocketAddr, bytes: u64 },
    Failed(String),
    /// The port is taken, most likely by a session that is already running
    AlreadyRunning(String),
}

/// How a GET for the archive ended
#[derive(Debug)]
enum Delivery {
    Sent { peer: SocketAddr, bytes: u64 },
    Broken { peer: SocketAddr, error: String },
}

pub enum Listening {
    Bound(TcpListener),
    /// Another session holds the port
    InUse(String),
}

/// Bind `port` on all interfaces. A taken port is reported, not raised.
pub async fn bind(port: u16) -> Result<Listening> {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => Ok(Listening::Bound(l)),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            eprintln!("{}", e);
            eprintln!("Server has already started");
            Ok(Listening::InUse(e.to_string()))
        }
        Err(e) => Err(e).with_context(|| format!("bind port {}", port)),
    }
}

pub struct TransferServer {
    root: PathBuf,
    archive: PathBuf,
    logger: Arc<dyn Logger>,
    state: Arc<Mutex<ServerState>>,
}

impl TransferServer {
    /// `archive` must live under `root`; it is reachable at its relative path
    pub fn new(root: impl Into<PathBuf>, archive: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            archive: archive.into(),
            logger: Arc::new(NoopLogger),
            state: Arc::new(Mutex::new(ServerState::Idle)),
        }
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// `Serving` while a session runs; back to `Idle` once it has ended and
    /// the archive is gone. The returned `ServeOutcome` says how it ended.
    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// Bind `port` on all interfaces and serve until one transfer finishes
    pub async fn serve(&self, port: u16) -> Result<ServeOutcome> {
        match bind(port).await? {
            Listening::Bound(listener) => self.serve_on(listener).await,
            Listening::InUse(msg) => Ok(ServeOutcome::AlreadyRunning(msg)),
        }
    }

    pub async fn serve_on(&self, listener: TcpListener) -> Result<ServeOutcome> {
        {
            let mut state = self.state.lock();
            if *state == ServerState::Serving {
                return Ok(ServeOutcome::AlreadyRunning("session in progress".into()));
            }
            *state = ServerState::Serving;
        }
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
        self.logger.serve_start(&self.archive, port);
        println!("Starting Server..... (port {})", port);

        let (done_tx, mut done_rx) = mpsc::channel::<Delivery>(1);
        let handler = Arc::new(RequestHandler {
            root: self.root.clone(),
            archive: self.archive.clone(),
            done: done_tx,
        });

        let accept_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    delivery = done_rx.recv() => return delivery,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let _ = stream.set_nodelay(true);
                            let h = handler.clone();
                            tokio::spawn(async move { h.handle(stream, peer).await });
                        }
                        Err(e) => {
                            eprintln!("accept failed: {}", e);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    },
                }
            }
        });

        let delivery = accept_loop.await;
        let outcome = match delivery {
            Ok(Some(Delivery::Sent { peer, bytes })) => {
                println!("File transfer was completed. Server is shutting down.....");
                self.logger.sent(&peer.to_string(), bytes);
                ServeOutcome::Completed { peer, bytes }
            }
            Ok(Some(Delivery::Broken { peer, error })) => {
                eprintln!("Transfer to {} failed: {}. Server is shutting down.....", peer, error);
                self.logger.error("serve", &self.archive, &error);
                ServeOutcome::Failed(error)
            }
            Ok(None) => ServeOutcome::Failed("server stopped without a transfer".into()),
            Err(e) => ServeOutcome::Failed(format!("server task aborted: {}", e)),
        };

        *self.state.lock() = match outcome {
            ServeOutcome::Completed { .. } => ServerState::Completed,
            _ => ServerState::Failed,
        };
        if let Err(e) = std::fs::remove_file(&self.archive) {
            self.logger.error("cleanup", &self.archive, &e.to_string());
        }
        // Archive gone; ready for the next session
        *self.state.lock() = ServerState::Idle;
        Ok(outcome)
    }
}

struct RequestHandler {
    root: PathBuf,
    archive: PathBuf,
    done: mpsc::Sender<Delivery>,
}

struct RequestHead {
    method: String,
    target: String,
}

impl RequestHandler {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let mut reader = BufReader::new(stream);
        let head = match timeout(
            Duration::from_millis(REQUEST_HEAD_MS),
            read_request_head(&mut reader),
        )
        .await
        {
            Ok(Ok(head)) => head,
            Ok(Err(_)) => {
                let _ = respond_status(reader.get_mut(), 400, "Bad Request").await;
                return;
            }
            Err(_) => {
                let _ = respond_status(reader.get_mut(), 408, "Request Timeout").await;
                return;
            }
        };
        let stream = reader.get_mut();

        let with_body = match head.method.as_str() {
            "GET" => true,
            "HEAD" => false,
            _ => {
                let _ = respond_status(stream, 501, "Not Implemented").await;
                return;
            }
        };

        let path = translate_path(&self.root, &head.target);
        if !self.is_archive(&path) {
            let _ = respond_status(stream, 404, "Not Found").await;
            return;
        }

        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(_) => {
                let _ = respond_status(stream, 404, "Not Found").await;
                return;
            }
        };
        let len = match file.metadata().await {
            Ok(m) => m.len(),
            Err(_) => {
                let _ = respond_status(stream, 500, "Internal Server Error").await;
                return;
            }
        };

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            len
        );
        if !with_body {
            let _ = stream.write_all(header.as_bytes()).await;
            let _ = stream.shutdown().await;
            return;
        }

        // From here on the session ends whatever happens
        let result: std::io::Result<u64> = async {
            stream.write_all(header.as_bytes()).await?;
            let sent = tokio::io::copy(&mut file, &mut *stream).await?;
            stream.flush().await?;
            stream.shutdown().await?;
            Ok(sent)
        }
        .await;
        drop(file);

        let delivery = match result {
            Ok(bytes) if bytes == len => Delivery::Sent { peer, bytes },
            Ok(bytes) => Delivery::Broken {
                peer,
                error: format!("archive shrank while sending ({} of {} bytes)", bytes, len),
            },
            Err(e) => Delivery::Broken {
                peer,
                error: e.to_string(),
            },
        };
        let _ = self.done.try_send(delivery);
    }

    fn is_archive(&self, path: &Path) -> bool {
        path == self.archive && path.is_file()
    }
}

async fn read_request_head(reader: &mut BufReader<TcpStream>) -> Result<RequestHead> {
    let mut budget = MAX_HEAD_BYTES;
    let line = read_head_line(reader, &mut budget).await?;
    let mut parts = line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) => (m.to_string(), t.to_string(), v),
        _ => anyhow::bail!("malformed request line"),
    };
    if !version.starts_with("HTTP/1.") {
        anyhow::bail!("unsupported protocol {}", version);
    }

    // Headers are read and discarded; nothing in them changes the response
    loop {
        let header = read_head_line(reader, &mut budget).await?;
        if header.is_empty() || header == "\r\n" || header == "\n" {
            break;
        }
    }
    Ok(RequestHead { method, target })
}

/// One line of the request head, never buffering more than `budget` bytes.
/// Running out of budget before the newline is an error.
async fn read_head_line(reader: &mut BufReader<TcpStream>, budget: &mut usize) -> Result<String> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(*budget as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n > *budget {
        anyhow::bail!("request head too large");
    }
    *budget -= n;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn respond_status(stream: &mut TcpStream, code: u16, reason: &str) -> std::io::Result<()> {
    let body = format!("{} {}\n", code, reason);
    let msg = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        code,
        reason,
        body.len(),
        body
    );
    stream.write_all(msg.as_bytes()).await?;
    stream.shutdown().await
}
