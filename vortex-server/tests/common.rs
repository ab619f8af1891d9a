//! Shared harness for end-to-end tests: spins up a real Vortex server on
//! an ephemeral port, backed by a temp-directory journal, and hands back
//! a helper for driving `TcpStream` connections against it.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;

use vortex_core::{Journal, PubQueue, Registry, Store};
use vortex_server::config::Args;
use vortex_server::context::AppContext;
use vortex_server::server;
use vortex_server::worker_pool::WorkerPool;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: std::net::SocketAddr,
    ctx: AppContext,
    shutdown: Arc<Notify>,
    accept_handle: tokio::task::JoinHandle<()>,
    pool: Option<WorkerPool>,
}

impl TestServer {
    /// Starts a server with the given rotation interval (seconds) and
    /// retained-segment count, backed by a fresh temp directory.
    pub async fn start(interval: u64, keep: u64) -> (Self, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let args = Args {
            version: (),
            port: 0,
            log_level: 4,
            console_log_level: 4,
            interval,
            keep,
            peer: None,
            name: "vortex-test".to_string(),
        };

        let (journal, _segments) = Journal::open(tmp.path(), args.keep as usize)
            .await
            .expect("open journal");
        let store = Store::new();
        let registry = Registry::new();
        let pub_queue = PubQueue::new();
        let ctx = AppContext::new(args, store, journal, registry, pub_queue);

        let pool = WorkerPool::spawn(2, ctx.clone());
        let shutdown = Arc::new(Notify::new());

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let addr = listener.local_addr().expect("local_addr");

        let accept_ctx = ctx.clone();
        let accept_pool = pool.handle();
        let accept_shutdown = shutdown.clone();
        let accept_handle = tokio::spawn(async move {
            let _ = server::run(listener, accept_ctx, accept_pool, accept_shutdown).await;
        });

        (
            Self {
                addr,
                ctx,
                shutdown,
                accept_handle,
                pool: Some(pool),
            },
            tmp,
        )
    }

    /// Runs one rotation to completion before returning.
    pub async fn rotate(&self) {
        vortex_core::processor::rotate(&self.ctx.journal(), &self.ctx.store())
            .await
            .expect("rotate");
    }

    pub async fn shutdown(mut self) {
        self.shutdown.notify_waiters();
        let _ = (&mut self.accept_handle).await;
        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
    }
}

/// A client connection plus a small line-buffered read helper.
pub struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    pub async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut client = Self {
            stream,
            buf: Vec::new(),
        };
        // Every connection opens with a greeting line; drain it so callers
        // start from a clean slate.
        let greeting = client.read_line().await;
        assert_eq!(greeting, "$:VORTEX");
        client
    }

    pub async fn send(&mut self, line: &str) {
        self.stream
            .write_all(line.as_bytes())
            .await
            .expect("write");
    }

    /// Reads and returns the next newline-delimited frame, without the
    /// trailing `\n`, blocking (with a timeout) until one full line has
    /// arrived.
    pub async fn read_line(&mut self) -> String {
        timeout(RECV_TIMEOUT, async {
            loop {
                if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                    let line = self.buf.drain(..=pos).collect::<Vec<u8>>();
                    return String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                }
                let mut chunk = [0u8; 4096];
                let n = self.stream.read(&mut chunk).await.expect("read");
                assert_ne!(n, 0, "connection closed before a full line arrived");
                self.buf.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .expect("timed out waiting for a line")
    }
}
