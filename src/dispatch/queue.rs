//! Deduplicating delay queue for reconcile requests.
//!
//! Each controller owns one `WorkQueue`. Items are object identities; a key
//! that is already queued absorbs later enqueues (keeping the earliest ready
//! time), and a key that is in flight parks re-enqueues until the current
//! reconcile completes, so at most one reconcile per identity runs at a time.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::ObjectKey;

/// Per-controller queue of pending reconcile requests.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

struct QueueState {
    /// Keys waiting to be dispatched, with the instant they become eligible.
    /// Duplicate enqueues min-merge the ready time.
    pending: HashMap<ObjectKey, Instant>,
    /// Keys currently being reconciled by a worker.
    in_flight: HashSet<ObjectKey>,
    /// Keys re-enqueued while in flight; moved to `pending` on completion.
    parked: HashMap<ObjectKey, Instant>,
    shutting_down: bool,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: HashMap::new(),
                in_flight: HashSet::new(),
                parked: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Add a key to the queue, eligible after the optional delay.
    ///
    /// If the key is already pending, the earlier of the two ready times
    /// wins. If the key is in flight, the request parks and is re-queued
    /// when the current reconcile finishes.
    pub fn enqueue(&self, key: ObjectKey, after: Option<Duration>) {
        let ready_at = Instant::now() + after.unwrap_or(Duration::ZERO);
        {
            #[allow(clippy::expect_used)]
            let mut state = self.state.lock().expect("work queue lock poisoned");
            if state.in_flight.contains(&key) {
                merge_min(&mut state.parked, key, ready_at);
            } else {
                merge_min(&mut state.pending, key, ready_at);
            }
        }
        self.notify.notify_waiters();
    }

    /// Wait for the next eligible key and mark it in flight.
    ///
    /// Returns `None` once the queue is shut down. Keys are returned in
    /// ready-time order; a key is never returned before its delay elapses.
    pub async fn pop(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before inspecting state so an enqueue
            // racing with this check is not missed.
            notified.as_mut().enable();

            let wait_until = {
                #[allow(clippy::expect_used)]
                let mut state = self.state.lock().expect("work queue lock poisoned");
                if state.shutting_down {
                    return None;
                }
                let now = Instant::now();
                let next = state
                    .pending
                    .iter()
                    .min_by_key(|(_, at)| **at)
                    .map(|(key, at)| (key.clone(), *at));
                match next {
                    Some((key, at)) if at <= now => {
                        state.pending.remove(&key);
                        state.in_flight.insert(key.clone());
                        return Some(key);
                    }
                    Some((_, at)) => Some(at),
                    None => None,
                }
            };

            match wait_until {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark a key's reconcile as finished, releasing any parked re-enqueue.
    pub fn done(&self, key: &ObjectKey) {
        {
            #[allow(clippy::expect_used)]
            let mut state = self.state.lock().expect("work queue lock poisoned");
            state.in_flight.remove(key);
            if let Some(ready_at) = state.parked.remove(key) {
                merge_min(&mut state.pending, key.clone(), ready_at);
            }
        }
        self.notify.notify_waiters();
    }

    /// Freeze the queue: `pop` returns `None` from now on. Pending items are
    /// retained but no longer dispatched.
    pub fn shut_down(&self) {
        {
            #[allow(clippy::expect_used)]
            let mut state = self.state.lock().expect("work queue lock poisoned");
            state.shutting_down = true;
        }
        self.notify.notify_waiters();
    }

    /// Number of keys pending dispatch (excluding in-flight keys).
    pub fn pending_len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("work queue lock poisoned");
        state.pending.len()
    }

    /// Dispatchable entries for a key: pending plus in-flight. A parked
    /// re-enqueue coalesces into its in-flight entry, so the total never
    /// exceeds 1.
    pub fn entries_for(&self, key: &ObjectKey) -> usize {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("work queue lock poisoned");
        usize::from(state.pending.contains_key(key)) + usize::from(state.in_flight.contains(key))
    }
}

fn merge_min(map: &mut HashMap<ObjectKey, Instant>, key: ObjectKey, ready_at: Instant) {
    map.entry(key)
        .and_modify(|at| {
            if ready_at < *at {
                *at = ready_at;
            }
        })
        .or_insert(ready_at);
}
