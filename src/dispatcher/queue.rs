//! Deduplicating work queue with per-key backoff
//!
//! A key is in at most one of three places: waiting in the queue, being
//! processed by a worker, or both (dirty while processing), in which case it
//! is queued again once the worker calls [`WorkQueue::done`]. The same key is
//! therefore never handed to two workers at once, and any number of adds
//! while it waits collapse into one. Delayed adds collapse too: a key has at
//! most one pending timer, set to the earliest requested deadline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::controller::BackoffConfig;

struct Inner<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed
    dirty: HashSet<K>,
    /// Keys handed to a worker and not yet done
    processing: HashSet<K>,
    /// Consecutive failures per key
    failures: HashMap<K, u32>,
    /// Pending delayed add per key
    timers: HashMap<K, (Instant, AbortHandle)>,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    inner: Mutex<Inner<K>>,
    notify: Notify,
    backoff: BackoffConfig,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                timers: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            backoff,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a key. No-op if it is already waiting or the queue is shutting down.
    pub fn add(&self, key: K) {
        let mut inner = self.lock();
        if inner.shutting_down || !inner.dirty.insert(key.clone()) {
            return;
        }
        if inner.processing.contains(&key) {
            // Requeued by done()
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueue a key after `delay`. Keeps only the earliest pending deadline
    /// per key; a later one is dropped.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        let mut inner = self.lock();
        if inner.shutting_down {
            return;
        }
        if let Some((pending, _)) = inner.timers.get(&key) {
            if *pending <= deadline {
                return;
            }
        }

        let queue = Arc::clone(self);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let due = {
                let mut inner = queue.lock();
                match inner.timers.get(&timer_key) {
                    Some((pending, _)) if *pending == deadline => {
                        inner.timers.remove(&timer_key);
                        true
                    }
                    _ => false,
                }
            };
            if due {
                queue.add(timer_key);
            }
        });
        if let Some((_, superseded)) = inner.timers.insert(key, (deadline, timer.abort_handle())) {
            superseded.abort();
        }
    }

    /// Whether a delayed add is pending for a key
    pub fn is_scheduled(&self, key: &K) -> bool {
        self.lock().timers.contains_key(key)
    }

    /// Record a failure and enqueue the key after its backoff delay.
    /// Returns the delay.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) -> Duration {
        let attempt = self.record_failure(&key);
        let delay = self.backoff.delay_for_attempt(attempt);
        self.add_after(key, delay);
        delay
    }

    /// Record a failure and enqueue the key after a caller-chosen delay
    pub fn add_rate_limited_with(self: &Arc<Self>, key: K, delay: Duration) {
        self.record_failure(&key);
        self.add_after(key, delay);
    }

    fn record_failure(&self, key: &K) -> u32 {
        let mut inner = self.lock();
        let failures = inner.failures.entry(key.clone()).or_insert(0);
        let attempt = *failures;
        *failures = failures.saturating_add(1);
        attempt
    }

    /// Clear the failure count of a key
    pub fn forget(&self, key: &K) {
        self.lock().failures.remove(key);
    }

    /// Consecutive failures recorded for a key
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a shutdown between the check and
            // the await still wakes this worker
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.shutting_down {
                    return None;
                }
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    let more = !inner.queue.is_empty();
                    drop(inner);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key as processed. A key added while it was processing is queued again.
    pub fn done(&self, key: &K) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and refuse new ones. Keys being processed finish.
    pub fn shut_down(&self) {
        let mut inner = self.lock();
        inner.shutting_down = true;
        for (_, (_, timer)) in inner.timers.drain() {
            timer.abort();
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Keys waiting to be processed
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
