use crate::error::{ClientError, Result};
use crate::request::FetchRequest;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

struct Entry {
    ready_at: Instant,
    seq: u64,
    request: FetchRequest,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the earliest deadline sits at the top of the max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Deadline-ordered collection of fetch requests.
///
/// A request becomes eligible for `take` once its enqueue time plus its
/// backoff delay has elapsed. Requests are removed on dequeue and only
/// re-inserted after the worker finishes its fetch cycle, so at most
/// one worker processes a given topic-partition at a time.
pub struct FetchRequestQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    notify: Notify,
    shutdown: AtomicBool,
    seq: AtomicU64,
}

impl FetchRequestQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        }
    }

    /// Insert a request; always succeeds, even after shutdown, so
    /// in-flight fetch cycles can drain back into the queue.
    pub fn offer(&self, request: FetchRequest) {
        let entry = Entry {
            ready_at: Instant::now() + request.delay(),
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            request,
        };
        self.heap.lock().push(entry);
        self.notify.notify_waiters();
    }

    /// Wait until some request's deadline has elapsed and remove it.
    ///
    /// Fails with `Interrupted` when the queue is shut down while (or
    /// before) waiting.
    pub async fn take(&self) -> Result<FetchRequest> {
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                return Err(ClientError::Interrupted);
            }

            // Register for wakeups before inspecting the heap so an
            // offer between the check and the await is never missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait_until = {
                let mut heap = self.heap.lock();
                let now = Instant::now();
                if heap.peek().is_some_and(|entry| entry.ready_at <= now) {
                    if let Some(entry) = heap.pop() {
                        return Ok(entry.request);
                    }
                }
                heap.peek().map(|entry| entry.ready_at)
            };

            match wait_until {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Number of requests currently resident in the queue
    pub fn size(&self) -> usize {
        self.heap.lock().len()
    }

    /// Fail all blocked and future `take` calls. Inserts still succeed.
    pub fn shutdown(&self) {
        self.shutdown.store(true, AtomicOrdering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(AtomicOrdering::Acquire)
    }
}

impl Default for FetchRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
