//! Applies a parsed [`crate::protocol::Operation`] to the Store, Journal,
//! and Watcher Registry. Modeled as a single [`Processor`] trait with three
//! implementations — live-server, journal-replay, rotate-replay — rather
//! than an inheritance hierarchy over opcode handlers.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;

use crate::journal::{Journal, ReplaySink};
use crate::loop_analyzer;
use crate::protocol::{self, Operation};
use crate::pub_queue::PubQueue;
use crate::registry::{Registry, Watcher};
use crate::store::Store;

/// Greeting the server writes to every freshly accepted connection.
pub const GREETING: &[u8] = b"$:VORTEX\n";
/// Acknowledgement a peer-link client writes back on receiving [`GREETING`].
pub const GREETING_ACK: &[u8] = b"$:VORTEX_CLIENT";

/// Capability set a line can be dispatched against: add, read, remove,
/// read-and-remove, watch (with optional one-shot/republish), or error.
/// Live dispatch additionally journals, mirrors, and notifies; replay
/// dispatch only ever touches a Store.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn do_add(&self, fd: u64, key: Vec<u8>, value: Vec<u8>);
    async fn do_remove(&self, fd: u64, key: Vec<u8>);
    async fn do_read_remove(&self, fd: u64, key: Vec<u8>);

    async fn do_read(&self, _fd: u64, _key: Vec<u8>) {}
    async fn do_watch(
        &self,
        _fd: u64,
        _key: Vec<u8>,
        _tag: Vec<u8>,
        _republish_key: Option<Vec<u8>>,
        _one_shot: bool,
    ) {
    }
    async fn do_error(&self, _fd: u64, _kind: &'static str, _line: Vec<u8>) {}
}

/// Scans `line` and dispatches it to `processor`. Used for live client and
/// peer-mirror input, where the wire grammar is unprefixed.
pub async fn dispatch(processor: &dyn Processor, fd: u64, line: &[u8]) {
    match protocol::scan(line) {
        Ok(op) => apply(processor, fd, op).await,
        Err(err) => processor.do_error(fd, err.kind, err.line).await,
    }
}

/// Scans `line` in replay mode (tolerating a leading timestamp field) and
/// dispatches it. Used for journal startup replay and rotation replay.
pub async fn dispatch_replay(processor: &dyn Processor, line: &[u8]) {
    match protocol::scan_replay(line) {
        Ok(op) => apply(processor, 0, op).await,
        Err(err) => processor.do_error(0, err.kind, err.line).await,
    }
}

async fn apply(processor: &dyn Processor, fd: u64, op: Operation) {
    match op {
        Operation::Add { key, value } => processor.do_add(fd, key, value).await,
        Operation::Remove { key } => processor.do_remove(fd, key).await,
        Operation::Read { key } => processor.do_read(fd, key).await,
        Operation::ReadRemove { key } => processor.do_read_remove(fd, key).await,
        Operation::Watch {
            key,
            tag,
            republish_key,
            one_shot,
        } => {
            processor
                .do_watch(fd, key, tag, republish_key, one_shot)
                .await
        }
    }
}

fn add_record(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(key.len() + value.len() + 2);
    record.push(b'+');
    record.extend_from_slice(key);
    record.push(b' ');
    record.extend_from_slice(value);
    record
}

fn remove_record(key: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(key.len() + 1);
    record.push(b'-');
    record.extend_from_slice(key);
    record
}

/// The live-server Processor: the only variant that journals, mirrors to a
/// peer, and drives watcher notification.
pub struct LiveProcessor {
    store: Arc<Store>,
    journal: Arc<Journal>,
    registry: Arc<Registry>,
    pub_queue: Arc<PubQueue>,
    echo_fd: Arc<SyncMutex<Option<u64>>>,
}

impl LiveProcessor {
    pub fn new(
        store: Arc<Store>,
        journal: Arc<Journal>,
        registry: Arc<Registry>,
        pub_queue: Arc<PubQueue>,
        echo_fd: Arc<SyncMutex<Option<u64>>>,
    ) -> Self {
        Self {
            store,
            journal,
            registry,
            pub_queue,
            echo_fd,
        }
    }

    fn mirror(&self, record: &[u8]) {
        let target = *self.echo_fd.lock();
        if let Some(fd) = target {
            let mut line = record.to_vec();
            line.push(b'\n');
            self.registry.send_to(fd, line);
        }
    }

    /// Drains the Pub Queue, re-dispatching every synthesized request
    /// through this same processor. Called by the worker once it has
    /// finished handling the line(s) that produced the requests.
    pub async fn drain_pub_queue(&self) {
        self.pub_queue
            .drain(|request| async move {
                dispatch(self, 0, &request).await;
            })
            .await;
    }
}

#[async_trait]
impl Processor for LiveProcessor {
    async fn do_add(&self, fd: u64, key: Vec<u8>, value: Vec<u8>) {
        let record = add_record(&key, &value);
        if let Err(err) = self.journal.append(&record).await {
            tracing::error!(error = %err, "journal append failed; mutation dropped");
            self.registry.send_to(
                fd,
                protocol::error_frame("journal_unavailable", &key),
            );
            return;
        }
        self.mirror(&record);
        self.store.set(key.clone(), value.clone());
        self.registry.send_to(fd, protocol::colon_frame(b"OK", &key));

        let want_delete = self.registry.notify(&key, &value, &self.pub_queue);
        if want_delete {
            self.store.remove(&key);
        }
    }

    async fn do_remove(&self, fd: u64, key: Vec<u8>) {
        let record = remove_record(&key);
        if let Err(err) = self.journal.append(&record).await {
            tracing::error!(error = %err, "journal append failed; mutation dropped");
            self.registry.send_to(
                fd,
                protocol::error_frame("journal_unavailable", &key),
            );
            return;
        }
        self.mirror(&record);
        let removed = self.store.remove(&key);
        self.registry.send_to(
            fd,
            protocol::colon_frame(format!("({removed})").as_bytes(), &key),
        );
    }

    async fn do_read(&self, fd: u64, key: Vec<u8>) {
        let _guard = self.journal.lock().await;
        match self.store.get(&key) {
            Some(value) => self.registry.send_to(fd, protocol::colon_frame(&key, &value)),
            None => self.registry.send_to(fd, protocol::colon_frame(b"NF", &key)),
        }
    }

    async fn do_read_remove(&self, fd: u64, key: Vec<u8>) {
        let mut guard = self.journal.lock().await;
        match self.store.get(&key) {
            Some(value) => {
                let record = remove_record(&key);
                if let Err(err) = guard.append(&record).await {
                    tracing::error!(error = %err, "journal append failed; mutation dropped");
                    self.registry.send_to(
                        fd,
                        protocol::error_frame("journal_unavailable", &key),
                    );
                    return;
                }
                drop(guard);
                self.mirror(&record);
                self.store.remove(&key);
                self.registry.send_to(fd, protocol::colon_frame(&key, &value));
            }
            None => self.registry.send_to(fd, protocol::colon_frame(b"NF", &key)),
        }
    }

    async fn do_watch(
        &self,
        fd: u64,
        key: Vec<u8>,
        tag: Vec<u8>,
        republish_key: Option<Vec<u8>>,
        one_shot: bool,
    ) {
        let guard = self.journal.lock().await;
        let current = self.store.get(&key);
        let republish_key = match republish_key {
            Some(candidate) => {
                let edges = self.registry.snapshot_publishers();
                if loop_analyzer::accepts(&edges, &(key.clone(), candidate.clone())) {
                    Some(candidate)
                } else {
                    tracing::warn!(
                        source = %String::from_utf8_lossy(&key),
                        target = %String::from_utf8_lossy(&candidate),
                        "rejecting republish edge: would create a cycle"
                    );
                    None
                }
            }
            None => None,
        };

        // Keep the journal lock held through the add: it's what makes the
        // snapshot-check-then-add sequence atomic. Dropping it before `add`
        // would let two concurrent subscriptions each pass `accepts` against
        // a stale snapshot and jointly wire in a cycle neither saw alone.
        self.registry
            .add(key.clone(), Watcher::new(fd, tag.clone(), republish_key, one_shot));
        drop(guard);

        let value = current.unwrap_or_default();
        self.registry.send_to(fd, protocol::colon_frame(&tag, &value));
    }

    async fn do_error(&self, fd: u64, kind: &'static str, line: Vec<u8>) {
        self.registry.send_to(fd, protocol::error_frame(kind, &line));
    }
}

/// Replays mutation records into a single target Store. Used both for the
/// startup replay (target = live Store) and the rotation replay (target =
/// rotate-scratch Store); neither journals, mirrors, or notifies.
pub struct ReplayProcessor {
    target: Arc<Store>,
}

impl ReplayProcessor {
    pub fn new(target: Arc<Store>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Processor for ReplayProcessor {
    async fn do_add(&self, _fd: u64, key: Vec<u8>, value: Vec<u8>) {
        self.target.set(key, value);
    }

    async fn do_remove(&self, _fd: u64, key: Vec<u8>) {
        self.target.remove(&key);
    }

    async fn do_read_remove(&self, _fd: u64, key: Vec<u8>) {
        self.target.remove(&key);
    }
}

#[async_trait]
impl ReplaySink for ReplayProcessor {
    async fn apply(&self, line: &[u8]) {
        dispatch_replay(self, line).await;
    }
}

/// Runs one rotation: file-level rotation plus replay into a scratch
/// Store, followed by the atomic swap into `main_store` (§4.B steps 3-5).
pub async fn rotate(journal: &Journal, main_store: &Arc<Store>) -> crate::error::Result<()> {
    let rotate_store = Arc::new(Store::new());
    let sink = ReplayProcessor::new(rotate_store.clone());
    journal.rotate(&sink).await?;
    main_store.swap(&rotate_store);
    rotate_store.clear();
    Ok(())
}
