//! Explicit application context replacing the process-wide globals a
//! from-scratch port would otherwise reach for — store, journal, registry,
//! pub queue, and the peer-mirror latch are constructed once and handed to
//! every task, following the host crate family's own `AppContext` struct.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use vortex_core::{Journal, PubQueue, Registry, Store};

use crate::config::Args;

#[derive(Clone)]
pub struct AppContext {
    config: Arc<Args>,
    store: Arc<Store>,
    journal: Arc<Journal>,
    registry: Arc<Registry>,
    pub_queue: Arc<PubQueue>,
    echo_fd: Arc<SyncMutex<Option<u64>>>,
    next_fd: Arc<AtomicU64>,
    dispatch_locks: Arc<DashMap<u64, Arc<AsyncMutex<()>>>>,
}

impl AppContext {
    pub fn new(config: Args, store: Store, journal: Journal, registry: Registry, pub_queue: PubQueue) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            journal: Arc::new(journal),
            registry: Arc::new(registry),
            pub_queue: Arc::new(pub_queue),
            echo_fd: Arc::new(SyncMutex::new(None)),
            next_fd: Arc::new(AtomicU64::new(1)),
            dispatch_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &Args {
        &self.config
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn journal(&self) -> Arc<Journal> {
        self.journal.clone()
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn pub_queue(&self) -> Arc<PubQueue> {
        self.pub_queue.clone()
    }

    pub fn echo_fd(&self) -> Arc<SyncMutex<Option<u64>>> {
        self.echo_fd.clone()
    }

    pub fn set_echo_fd(&self, fd: u64) {
        *self.echo_fd.lock() = Some(fd);
    }

    /// Clears the echo-fd latch if it currently points at `fd` — called
    /// from that connection's EOF handling.
    pub fn clear_echo_fd_if(&self, fd: u64) {
        let mut guard = self.echo_fd.lock();
        if *guard == Some(fd) {
            *guard = None;
        }
    }

    /// Allocates the next monotonically increasing connection identity.
    pub fn next_fd(&self) -> u64 {
        self.next_fd.fetch_add(1, Ordering::Relaxed)
    }

    /// Acquires the per-connection dispatch lock for `fd`, serializing event
    /// processing for that connection across the worker pool. The DashMap
    /// shard lock is only held long enough to fetch or insert the per-fd
    /// mutex, never across the subsequent `.await`.
    pub async fn lock_connection(&self, fd: u64) -> OwnedMutexGuard<()> {
        let mutex = self
            .dispatch_locks
            .entry(fd)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drops the per-connection dispatch lock for `fd`. Called once that
    /// connection's EOF event has been processed, so the map doesn't grow
    /// without bound across the server's lifetime.
    pub fn forget_connection(&self, fd: u64) {
        self.dispatch_locks.remove(&fd);
    }

    pub fn make_live_processor(&self) -> vortex_core::LiveProcessor {
        vortex_core::LiveProcessor::new(
            self.store(),
            self.journal(),
            self.registry(),
            self.pub_queue(),
            self.echo_fd(),
        )
    }
}
