//! Fixed pool of workers draining a shared queue of per-connection events.
//!
//! Grounded on the host crate family's async task-queue pattern (an `mpsc`
//! submission channel feeding tokio tasks), generalized from a single
//! consumer to `W` concurrent consumers by handing every worker its own
//! clone of an `Arc<tokio::sync::Mutex<Receiver>>` — only one worker holds
//! the lock at a time, so exactly one of them dequeues a given event, the
//! same multi-consumer idiom the family's job-queue code uses for a pool
//! of concurrent workers.
//!
//! The shared receiver lock only serializes dequeue, not processing, so two
//! events for the same connection can still land on different workers. Each
//! worker acquires `AppContext::lock_connection` for the duration of an
//! `Input`/`Eof` event, which re-serializes handling per connection without
//! pinning a connection to one worker.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use vortex_core::processor::{self, GREETING, GREETING_ACK};

use crate::context::AppContext;

#[derive(Debug)]
pub enum EventKind {
    Connect,
    Input(Vec<u8>),
    Eof,
}

#[derive(Debug)]
pub struct Event {
    pub fd: u64,
    pub kind: EventKind,
}

/// Cheaply cloneable submission side, handed to the accept loop and the
/// peer link so they can feed events without sharing the pool itself.
#[derive(Clone)]
pub struct WorkerPoolHandle {
    sender: mpsc::UnboundedSender<Event>,
}

impl WorkerPoolHandle {
    pub fn submit(&self, event: Event) {
        if self.sender.send(event).is_err() {
            tracing::error!("worker pool receiver gone; event dropped");
        }
    }
}

pub struct WorkerPool {
    sender: mpsc::UnboundedSender<Event>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(workers: usize, ctx: AppContext) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { worker_loop(id, receiver, ctx).await })
            })
            .collect();

        Self { sender, handles }
    }

    pub fn handle(&self) -> WorkerPoolHandle {
        WorkerPoolHandle {
            sender: self.sender.clone(),
        }
    }

    /// Drops this pool's own sender and waits for every worker to drain
    /// and exit. Callers must have already dropped any [`WorkerPoolHandle`]
    /// clones they held, or the submission channel will stay open.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Event>>>,
    ctx: AppContext,
) {
    let live = ctx.make_live_processor();
    loop {
        let event = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };
        let Some(event) = event else {
            tracing::debug!(worker = id, "worker pool channel closed; exiting");
            break;
        };
        handle_event(&live, &ctx, event).await;
    }
}

async fn handle_event(live: &vortex_core::LiveProcessor, ctx: &AppContext, event: Event) {
    match event.kind {
        EventKind::Connect => {
            ctx.registry().send_to(event.fd, GREETING.to_vec());
        }
        EventKind::Input(bytes) => {
            // Two Input events for the same connection can be dequeued by
            // different workers; this lock makes sure one is fully applied
            // before the next starts, so mutations stay in submission order.
            let _dispatch_guard = ctx.lock_connection(event.fd).await;
            for line in bytes.split(|&b| b == b'\n') {
                let line = strip_cr(line);
                if line.is_empty() {
                    continue;
                }
                if line == GREETING_ACK {
                    ctx.set_echo_fd(event.fd);
                    tracing::info!(fd = event.fd, "peer link handshake completed; mirroring mutations to this connection");
                    continue;
                }
                processor::dispatch(live, event.fd, line).await;
            }
            live.drain_pub_queue().await;
        }
        EventKind::Eof => {
            let _dispatch_guard = ctx.lock_connection(event.fd).await;
            ctx.registry().remove_by_fd(event.fd);
            ctx.clear_echo_fd_if(event.fd);
            drop(_dispatch_guard);
            ctx.forget_connection(event.fd);
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line {
        [rest @ .., b'\r'] => rest,
        other => other,
    }
}
