//! Optional outbound connection that mirrors this instance into another
//! Vortex instance: connects out, completes the greeting handshake, then
//! feeds whatever the peer mirrors back to us through the same worker pool
//! every other connection uses.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use vortex_core::processor::GREETING;
use vortex_core::VortexError;

use crate::context::AppContext;
use crate::worker_pool::{Event, EventKind, WorkerPoolHandle};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(60);
const READ_BUF_SIZE: usize = 8192;

/// Runs until `shutdown` fires, reconnecting to `peer_addr` no more than
/// once per [`RECONNECT_BACKOFF`].
pub async fn run(peer_addr: String, ctx: AppContext, pool: WorkerPoolHandle, shutdown: Arc<Notify>) {
    loop {
        tokio::select! {
            result = connect_once(&peer_addr, &ctx, &pool) => {
                if let Err(err) = result {
                    tracing::warn!(peer = %peer_addr, error = %err, "peer link connection failed");
                }
            }
            _ = shutdown.notified() => {
                tracing::info!("peer link shutting down");
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            _ = shutdown.notified() => {
                tracing::info!("peer link shutting down during backoff");
                return;
            }
        }
    }
}

async fn connect_once(peer_addr: &str, ctx: &AppContext, pool: &WorkerPoolHandle) -> anyhow::Result<()> {
    let stream = TcpStream::connect(peer_addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut greeting = String::new();
    reader.read_line(&mut greeting).await?;
    if greeting.trim_end() != String::from_utf8_lossy(&GREETING[..GREETING.len() - 1]) {
        tracing::warn!(peer = %peer_addr, greeting = %greeting.trim_end(), "unexpected greeting from peer");
        return Err(VortexError::PeerUnavailable.into());
    }
    write_half.write_all(b"$:VORTEX_CLIENT\n").await?;
    tracing::info!(peer = %peer_addr, "peer link handshake complete");

    let fd = ctx.next_fd();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => pool.submit(Event {
                fd,
                kind: EventKind::Input(buf[..n].to_vec()),
            }),
        }
    }
    pool.submit(Event {
        fd,
        kind: EventKind::Eof,
    });
    Ok(())
}
