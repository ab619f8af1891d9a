//! Accept loop: owns the listening socket, synthesizes `connect`/`input`/
//! `eof` events per connection, and feeds them to the Worker Pool.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};

use crate::context::AppContext;
use crate::worker_pool::{Event, EventKind, WorkerPoolHandle};

const READ_BUF_SIZE: usize = 8192;

pub async fn run(
    listener: TcpListener,
    ctx: AppContext,
    pool: WorkerPoolHandle,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                let fd = ctx.next_fd();
                tracing::info!(fd, %addr, "connection accepted");
                spawn_connection(stream, fd, ctx.clone(), pool.clone());
            }
            _ = shutdown.notified() => {
                tracing::info!("accept loop shutting down");
                return Ok(());
            }
        }
    }
}

fn spawn_connection(stream: tokio::net::TcpStream, fd: u64, ctx: AppContext, pool: WorkerPoolHandle) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    ctx.registry().register_connection(fd, outbound_tx);

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    pool.submit(Event {
        fd,
        kind: EventKind::Connect,
    });

    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    pool.submit(Event {
                        fd,
                        kind: EventKind::Input(buf[..n].to_vec()),
                    });
                }
            }
        }
        pool.submit(Event {
            fd,
            kind: EventKind::Eof,
        });
        tracing::info!(fd, "connection closed");
    });
}
