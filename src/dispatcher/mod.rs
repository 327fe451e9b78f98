//! Work-queue dispatcher
//!
//! Watch events enqueue keys on a [`WorkQueue`]; a fixed pool of workers
//! dequeues them and runs a [`Handler`]. A failed key is retried with
//! exponential backoff, a successful one has its failure count reset and may
//! ask to be requeued after a delay. A handler that panics counts as a
//! failure; the worker survives and keeps draining the queue.

pub mod owner;
pub mod queue;

use std::any::Any;
use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

pub use owner::{ChangeFilter, change_fingerprint, cluster_key, owner_key};
pub use queue::WorkQueue;

/// Namespace and name of a namespaced resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What to do with a key after it was handled successfully
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Requeue(Duration),
    /// Wait for the next watch event
    AwaitChange,
}

/// Processes one key at a time
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;
    type Error: fmt::Display + Send;

    async fn handle(&self, key: &Self::Key) -> Result<Action, Self::Error>;

    /// Delay before retrying `key` after its `attempt`th consecutive failure.
    /// `None` uses the queue's backoff.
    fn retry_delay(&self, _key: &Self::Key, _error: &Self::Error, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Worker pool draining a [`WorkQueue`]
pub struct Dispatcher<H: Handler> {
    queue: Arc<WorkQueue<H::Key>>,
    handler: Arc<H>,
    workers: usize,
}

impl<H: Handler> Dispatcher<H> {
    pub fn new(queue: Arc<WorkQueue<H::Key>>, handler: Arc<H>, workers: usize) -> Self {
        Self {
            queue,
            handler,
            workers: workers.max(1),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<H::Key>> {
        &self.queue
    }

    /// Run the workers until the queue is shut down and every in-flight key
    /// has been handled
    pub async fn run(self) {
        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            workers.spawn(worker(id, queue, handler));
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Dispatcher worker panicked: {}", e);
            }
        }
        debug!("Dispatcher stopped");
    }
}

async fn worker<H: Handler>(id: usize, queue: Arc<WorkQueue<H::Key>>, handler: Arc<H>) {
    while let Some(key) = queue.get().await {
        debug!(worker = id, key = %key, "Processing key");
        let result = AssertUnwindSafe(handler.handle(&key)).catch_unwind().await;
        match result {
            Ok(Ok(action)) => {
                queue.forget(&key);
                if let Action::Requeue(delay) = action {
                    queue.add_after(key.clone(), delay);
                }
            }
            Ok(Err(e)) => {
                let attempt = queue.num_requeues(&key);
                match handler.retry_delay(&key, &e, attempt) {
                    Some(delay) => {
                        // The handler logs its own failures
                        queue.add_rate_limited_with(key.clone(), delay);
                        debug!(key = %key, attempt, "Retrying in {:?}", delay);
                    }
                    None => {
                        let delay = queue.add_rate_limited(key.clone());
                        warn!(key = %key, attempt, "Handler failed: {}, retrying in {:?}", e, delay);
                    }
                }
            }
            Err(panic) => {
                let attempt = queue.num_requeues(&key);
                let delay = queue.add_rate_limited(key.clone());
                error!(
                    key = %key,
                    attempt,
                    "Handler panicked: {}, retrying in {:?}",
                    panic_message(panic.as_ref()),
                    delay
                );
            }
        }
        queue.done(&key);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
