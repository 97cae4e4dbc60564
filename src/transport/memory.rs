//! In-memory transport implementation.
//!
//! [`MemoryBroker`] simulates a direct-exchange broker entirely within the
//! process: exchanges route by exact routing-key match to bound queues,
//! queues buffer messages until a consumer exists, and each consumer
//! processes its deliveries in order. It is the **reference implementation**
//! of transport semantics and what the test suite runs against.
//!
//! [`MemoryFactory`] adds the failure controls the AMQP side gets for free
//! from a flaky network: opens can be made to fail, and the current link can
//! be severed to simulate a dropped connection (consumers die with the link,
//! exactly as a broker cancels consumers on a lost connection).
//!
//! ## Non-goals
//!
//! - Persistence across process restarts
//! - Exact emulation of AMQP channel/ack semantics (acks are implicit;
//!   handler failures are logged and the delivery is dropped)

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::macros::{log_debug, log_warn};
use crate::transport::{ConsumerFn, Delivery, Link, LinkFactory, LinkHealth, OutboundMessage};
use crate::{Error, Result, Topology};

/// Acquire a mutex guard, ignoring poisoning.
///
/// The router state has no invariants spanning multiple fields; the worst
/// outcome of a poisoned lock is a dropped message in a test broker.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One registered consumer: deliveries are fed through an ordered channel
/// into a pump task that awaits the handler for each message.
struct ConsumerSlot {
    link_id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct QueueState {
    consumers: Vec<ConsumerSlot>,
    pending: VecDeque<Delivery>,
    round_robin: usize,
}

#[derive(Default)]
struct RouterState {
    exchanges: Vec<String>,
    queues: HashMap<String, QueueState>,
    // (exchange, routing_key) -> bound queue names
    bindings: HashMap<(String, String), Vec<String>>,
}

/// In-process direct-exchange broker shared by every link of a test.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<MemoryBrokerInner>,
}

#[derive(Default)]
struct MemoryBrokerInner {
    state: Mutex<RouterState>,
    next_link_id: AtomicU64,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a topology: declare exchanges and queues, register bindings.
    /// Idempotent.
    pub fn declare(&self, topology: &Topology) {
        // ---
        let mut state = lock_ignore_poison(&self.inner.state);

        for exchange in &topology.exchanges {
            if !state.exchanges.contains(&exchange.name) {
                state.exchanges.push(exchange.name.clone());
            }
        }

        for queue in &topology.queues {
            state.queues.entry(queue.name.clone()).or_default();
        }

        for binding in &topology.bindings {
            let key = (binding.exchange.clone(), binding.routing_key.clone());
            let bound = state.bindings.entry(key).or_default();
            if !bound.contains(&binding.queue) {
                bound.push(binding.queue.clone());
            }
        }
    }

    /// Route a message through an exchange to its bound queues.
    ///
    /// Publishing to an undeclared exchange is an error, mirroring a channel
    /// error on a real broker. A message routed to a queue with no consumer
    /// is buffered until one appears; a message whose routing key has no
    /// binding is dropped.
    pub fn publish(&self, msg: OutboundMessage) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.inner.state);

        if !state.exchanges.contains(&msg.exchange) {
            return Err(Error::Transport(format!(
                "publish to undeclared exchange: {}",
                msg.exchange
            )));
        }

        let key = (msg.exchange.clone(), msg.routing_key.clone());
        let Some(bound) = state.bindings.get(&key).cloned() else {
            log_debug!(
                "no binding for {}/{}, message dropped",
                msg.exchange,
                msg.routing_key
            );
            return Ok(());
        };

        let delivery = Delivery {
            payload: msg.payload.clone(),
            correlation_id: msg.correlation_id.clone(),
            reply_to: msg.reply_to.clone(),
        };

        for queue_name in bound {
            if let Some(queue) = state.queues.get_mut(&queue_name) {
                deliver(queue, delivery.clone());
            }
        }

        Ok(())
    }

    fn add_consumer(&self, link_id: u64, queue_name: &str, handler: ConsumerFn) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.inner.state);

        let Some(queue) = state.queues.get_mut(queue_name) else {
            return Err(Error::Transport(format!(
                "consume on undeclared queue: {queue_name}"
            )));
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let pump_queue = queue_name.to_string();
        let pump = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                if let Err(err) = handler(delivery).await {
                    log_warn!("handler failed on {pump_queue}: {err}");
                }
            }
        });

        // Flush anything buffered while the queue had no consumer.
        while let Some(delivery) = queue.pending.pop_front() {
            let _ = tx.send(delivery);
        }

        queue.consumers.push(ConsumerSlot { link_id, tx, pump });
        Ok(())
    }

    /// Drop every consumer owned by `link_id`, as a broker does when the
    /// owning connection goes away.
    fn remove_link(&self, link_id: u64) {
        // ---
        let mut state = lock_ignore_poison(&self.inner.state);

        for queue in state.queues.values_mut() {
            queue.consumers.retain(|slot| {
                if slot.link_id == link_id {
                    slot.pump.abort();
                    false
                } else {
                    true
                }
            });
        }
    }

    fn next_link_id(&self) -> u64 {
        self.inner.next_link_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Hand a delivery to exactly one consumer (round robin), or buffer it.
fn deliver(queue: &mut QueueState, delivery: Delivery) {
    // ---
    if queue.consumers.is_empty() {
        queue.pending.push_back(delivery);
        return;
    }

    queue.round_robin = (queue.round_robin + 1) % queue.consumers.len();
    let slot = &queue.consumers[queue.round_robin];
    if slot.tx.send(delivery).is_err() {
        log_debug!("consumer channel closed, delivery dropped");
    }
}

/// One live in-memory session.
struct MemoryLink {
    id: u64,
    broker: MemoryBroker,
    health_tx: Arc<watch::Sender<LinkHealth>>,
}

impl MemoryLink {
    fn is_down(&self) -> bool {
        *self.health_tx.borrow() == LinkHealth::Down
    }
}

#[async_trait::async_trait]
impl Link for MemoryLink {
    async fn publish(&self, msg: OutboundMessage) -> Result<()> {
        // ---
        if self.is_down() {
            return Err(Error::Transport("link severed".to_string()));
        }
        self.broker.publish(msg)
    }

    async fn consume(&self, queue: &str, handler: ConsumerFn) -> Result<()> {
        // ---
        if self.is_down() {
            return Err(Error::Transport("link severed".to_string()));
        }
        self.broker.add_consumer(self.id, queue, handler)
    }

    fn health(&self) -> watch::Receiver<LinkHealth> {
        self.health_tx.subscribe()
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.broker.remove_link(self.id);
        self.health_tx.send_replace(LinkHealth::Down);
        Ok(())
    }
}

/// Remote control for a link handed out by [`MemoryFactory`], used by tests
/// to simulate a dropped connection.
struct SeverHandle {
    id: u64,
    broker: MemoryBroker,
    health_tx: Arc<watch::Sender<LinkHealth>>,
}

impl SeverHandle {
    fn sever(&self) {
        // ---
        self.broker.remove_link(self.id);
        self.health_tx.send_replace(LinkHealth::Down);
    }
}

/// Factory for in-memory links over a shared [`MemoryBroker`].
pub struct MemoryFactory {
    broker: MemoryBroker,
    topology: Topology,
    fail_opens: AtomicU32,
    current: Mutex<Option<SeverHandle>>,
}

impl MemoryFactory {
    /// Factory declaring `topology` on every open.
    pub fn new(broker: MemoryBroker, topology: Topology) -> Arc<Self> {
        Arc::new(Self {
            broker,
            topology,
            fail_opens: AtomicU32::new(0),
            current: Mutex::new(None),
        })
    }

    /// Make the next `n` calls to `open()` fail, simulating an unreachable
    /// broker.
    pub fn fail_next_opens(&self, n: u32) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    /// Sever the most recently opened link: its health flips to `Down` and
    /// its consumers are cancelled.
    pub fn sever_current(&self) {
        // ---
        let current = lock_ignore_poison(&self.current);
        if let Some(handle) = current.as_ref() {
            handle.sever();
        }
    }
}

#[async_trait::async_trait]
impl LinkFactory for MemoryFactory {
    async fn open(&self) -> Result<Box<dyn Link>> {
        // ---
        let remaining = self.fail_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transport("simulated connect failure".to_string()));
        }

        self.broker.declare(&self.topology);

        let id = self.broker.next_link_id();
        let (health_tx, _) = watch::channel(LinkHealth::Up);
        let health_tx = Arc::new(health_tx);

        let link = MemoryLink {
            id,
            broker: self.broker.clone(),
            health_tx: Arc::clone(&health_tx),
        };

        let mut current = lock_ignore_poison(&self.current);
        *current = Some(SeverHandle {
            id,
            broker: self.broker.clone(),
            health_tx,
        });

        Ok(Box::new(link))
    }
}
