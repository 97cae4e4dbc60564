//! Per-request waiter registry.
//!
//! Maps each in-flight correlation id to the channel its replies flow
//! through. At most one waiter exists per id at any time; the registration
//! is removed when the owning [`ReplyStream`] drops, which happens on every
//! completion path (terminal reply, timeout, publish failure). Replies
//! arriving for an id that is no longer registered are reported back to the
//! demultiplexer as unmatched and dropped there.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::macros::log_debug;
use crate::protocol::WorkerReply;
use crate::{CorrelationId, Error, Result};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// Mutex poisoning indicates that another task panicked while holding the
/// lock. The protected state here is a best-effort waiter map
/// (correlation id → reply sender):
/// - There are no invariants spanning multiple fields.
/// - The worst outcome is a dropped or unmatched reply.
/// - Connection-level failures are handled by the connection manager.
///
/// This avoids propagating non-`Send` poison errors across async
/// boundaries.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type WaiterMap = HashMap<CorrelationId, mpsc::UnboundedSender<WorkerReply>>;

/// Registry of in-flight request waiters.
#[derive(Default)]
pub(crate) struct WaiterRegistry {
    waiters: Mutex<WaiterMap>,
}

impl WaiterRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a waiter for `id` and return the stream its replies arrive
    /// on. The registration is removed when the stream drops.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateCorrelation` if a waiter already exists for
    /// this id; ids are minted fresh per request, so a collision indicates a
    /// caller bug.
    pub fn register(self: &Arc<Self>, id: CorrelationId) -> Result<ReplyStream> {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut waiters = lock_ignore_poison(&self.waiters);
            if waiters.contains_key(&id) {
                return Err(Error::DuplicateCorrelation(id));
            }
            waiters.insert(id.clone(), tx);
        }

        Ok(ReplyStream {
            id,
            rx,
            registry: Arc::clone(self),
        })
    }

    /// Route a decoded reply to the waiter registered for `id`.
    ///
    /// Returns `false` when no waiter is registered (late or duplicate
    /// delivery after the id retired) or the waiter stopped listening.
    pub fn dispatch(&self, id: &CorrelationId, reply: WorkerReply) -> bool {
        // ---
        let waiters = lock_ignore_poison(&self.waiters);
        match waiters.get(id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Number of registered waiters.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.waiters).len()
    }

    fn remove(&self, id: &CorrelationId) {
        // ---
        let mut waiters = lock_ignore_poison(&self.waiters);
        if waiters.remove(id).is_some() {
            log_debug!("waiter retired (correlation_id: {id})");
        }
    }
}

/// Receiving side of one waiter registration.
///
/// Dropping the stream unregisters the waiter, so every exit path of an RPC
/// call (terminal reply, timeout, publish failure) retires the correlation
/// id without bookkeeping at the call sites.
pub(crate) struct ReplyStream {
    id: CorrelationId,
    rx: mpsc::UnboundedReceiver<WorkerReply>,
    registry: Arc<WaiterRegistry>,
}

impl ReplyStream {
    /// Wait for the next reply routed to this correlation id.
    pub async fn recv(&mut self) -> Option<WorkerReply> {
        self.rx.recv().await
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
