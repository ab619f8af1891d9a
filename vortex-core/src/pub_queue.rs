//! FIFO of synthesized requests produced by watcher republish edges.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;

const INTER_POP_PAUSE: Duration = Duration::from_millis(10);

/// Instance-global queue of pending synthesized request lines. Drained by
/// the worker that produced the entries, in the same call, before it
/// returns control — this keeps a republish chain attributed to the
/// connection that triggered it.
#[derive(Default)]
pub struct PubQueue {
    queue: Mutex<VecDeque<Vec<u8>>>,
}

impl PubQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, request: Vec<u8>) {
        self.queue.lock().push_back(request);
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.queue.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drains every pending entry, invoking `handler` for each, pausing
    /// briefly between pops so other tasks can interleave. Entries pushed
    /// by `handler` itself (a republish chain) are drained too, since they
    /// land in the same queue before this call returns.
    pub async fn drain<F, Fut>(&self, mut handler: F)
    where
        F: FnMut(Vec<u8>) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let next = self.pop();
            match next {
                Some(request) => {
                    handler(request).await;
                    tokio::time::sleep(INTER_POP_PAUSE).await;
                }
                None => break,
            }
        }
    }
}
