//! Watcher subscriptions and notify fan-out.

use dashmap::DashMap;
use tokio::sync::mpsc;

/// A subscription bound to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watcher {
    pub fd: u64,
    pub tag: Vec<u8>,
    pub republish_key: Option<Vec<u8>>,
    pub one_shot: bool,
}

impl Watcher {
    pub fn new(fd: u64, tag: Vec<u8>, republish_key: Option<Vec<u8>>, one_shot: bool) -> Self {
        Self {
            fd,
            tag,
            republish_key,
            one_shot,
        }
    }

    fn matches_identity(&self, other: &Watcher) -> bool {
        self.fd == other.fd && self.tag == other.tag && self.one_shot == other.one_shot
    }
}

/// Mapping Key -> ordered list of Watchers, plus the per-connection outbound
/// channels notify fan-out writes frames to.
///
/// Grounded on a `DashMap`-keyed registry with per-connection `mpsc` senders,
/// the same shape the host crate family uses for its push-notification
/// connection manager.
#[derive(Default)]
pub struct Registry {
    watchers: DashMap<Vec<u8>, Vec<Watcher>>,
    connections: DashMap<u64, mpsc::UnboundedSender<Vec<u8>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            watchers: DashMap::new(),
            connections: DashMap::new(),
        }
    }

    pub fn register_connection(&self, fd: u64, sender: mpsc::UnboundedSender<Vec<u8>>) {
        self.connections.insert(fd, sender);
    }

    pub fn unregister_connection(&self, fd: u64) {
        self.connections.remove(&fd);
    }

    /// Writes `frame` to `fd`'s outbound channel, if it is still connected.
    /// Used both for direct replies and for watcher notification delivery.
    pub fn send_to(&self, fd: u64, frame: Vec<u8>) {
        if let Some(sender) = self.connections.get(&fd) {
            if sender.send(frame).is_err() {
                tracing::debug!(fd, "socket closed; delivery dropped");
            }
        }
    }

    /// Appends `watcher` to `key`'s list unless an entry with the same
    /// `(fd, tag, one_shot)` already exists. Returns whether it was added.
    pub fn add(&self, key: Vec<u8>, watcher: Watcher) -> bool {
        let mut entry = self.watchers.entry(key).or_default();
        if entry.iter().any(|w| w.matches_identity(&watcher)) {
            false
        } else {
            entry.push(watcher);
            true
        }
    }

    /// Removes every watcher whose `fd` matches, across all keys. Keys left
    /// with an empty watcher list are dropped entirely, which also drops
    /// any publisher edges rooted at that key since those edges are derived
    /// from the live watcher lists rather than stored separately.
    pub fn remove_by_fd(&self, fd: u64) {
        self.connections.remove(&fd);
        self.watchers.retain(|_key, watchers| {
            watchers.retain(|w| w.fd != fd);
            !watchers.is_empty()
        });
    }

    pub fn remove_by_key(&self, key: &[u8]) {
        self.watchers.remove(key);
    }

    /// Delivers `tag:value\n` to every watcher on `key`, in insertion order.
    /// Any watcher with a `republish_key` pushes a synthesized `+key value`
    /// request onto `pub_queue`. Returns true if any watcher on `key` is
    /// one-shot, signalling the caller to remove `key` from the Store.
    pub fn notify(&self, key: &[u8], value: &[u8], pub_queue: &crate::pub_queue::PubQueue) -> bool {
        let Some(watchers) = self.watchers.get(key) else {
            return false;
        };

        let mut want_delete = false;
        for watcher in watchers.iter() {
            self.send_to(watcher.fd, crate::protocol::colon_frame(&watcher.tag, value));

            if let Some(republish_key) = &watcher.republish_key {
                let mut request = Vec::with_capacity(2 + republish_key.len() + 1 + value.len());
                request.push(b'+');
                request.extend_from_slice(republish_key);
                request.push(b' ');
                request.extend_from_slice(value);
                pub_queue.push(request);
            }

            if watcher.one_shot {
                want_delete = true;
            }
        }
        want_delete
    }

    /// Snapshot of every `(source_key, republish_key)` edge presently
    /// implied by the watcher lists, for the Loop Analyzer.
    pub fn snapshot_publishers(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut edges = Vec::new();
        for entry in self.watchers.iter() {
            let source = entry.key();
            for watcher in entry.value() {
                if let Some(republish_key) = &watcher.republish_key {
                    edges.push((source.clone(), republish_key.clone()));
                }
            }
        }
        edges
    }
}
