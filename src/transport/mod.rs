//! Transport abstractions.
//!
//! This module defines the domain-level seam between the connection manager
//! and concrete broker clients. A [`Link`] is one live broker session:
//! publishing, consuming, and a health signal. A [`LinkFactory`] runs the
//! full connect sequence (connection, channel, topology declaration) and
//! hands back a fresh link; the connection manager calls it again for every
//! reconnect attempt.
//!
//! The transport layer delivers opaque payloads plus message metadata.
//! Correlation matching, timeouts, and reply routing are handled above it.
//!
//! The in-memory implementation is the reference for these semantics and is
//! what the test suite runs against; the AMQP implementation maps them onto
//! a real broker.

mod amqp;
mod memory;

pub use amqp::AmqpFactory;
pub use memory::{MemoryBroker, MemoryFactory};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::{CorrelationId, Result, RpcConfig};

/// Boxed future used by type-erased consumer handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased handler invoked for every delivery on a consumed queue.
///
/// The returned result drives acknowledgment: `Ok` acknowledges the
/// delivery, `Err` negatively acknowledges it so the broker may requeue or
/// dead-letter it. A failing handler never tears down the consumer loop.
pub type ConsumerFn = Arc<dyn Fn(Delivery) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// An outbound message addressed to an exchange and routing key.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Exchange to publish through.
    pub exchange: String,

    /// Routing key; doubles as the target-service selector.
    pub routing_key: String,

    /// Encoded payload bytes.
    pub payload: Bytes,

    /// Correlation id carried as message metadata.
    pub correlation_id: Option<CorrelationId>,

    /// Queue the receiver should reply to.
    pub reply_to: Option<String>,

    /// Whether to request persistent delivery.
    pub persistent: bool,
}

/// An inbound delivery handed to a consumer handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Payload bytes as received (still compressed).
    pub payload: Bytes,

    /// Correlation id from the message metadata, if any.
    pub correlation_id: Option<CorrelationId>,

    /// Reply destination from the message metadata, if any.
    pub reply_to: Option<String>,
}

/// Health of a live link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// The underlying session is usable.
    Up,

    /// The underlying session was lost; the link will not recover on its
    /// own.
    Down,
}

/// One live broker session.
///
/// A link does not reconnect; when its health flips to [`LinkHealth::Down`]
/// it is dead and the owner must obtain a new link from the factory.
#[async_trait]
pub trait Link: Send + Sync {
    /// Publish a message. Failures surface synchronously to the caller;
    /// nothing is retried at this layer.
    async fn publish(&self, msg: OutboundMessage) -> Result<()>;

    /// Start consuming `queue`, invoking `handler` for every delivery.
    async fn consume(&self, queue: &str, handler: ConsumerFn) -> Result<()>;

    /// Watch for this link's health transitions.
    fn health(&self) -> watch::Receiver<LinkHealth>;

    /// Tear the session down.
    async fn close(&self) -> Result<()>;
}

/// Opens fresh [`Link`]s, running the full connect sequence each time.
#[async_trait]
pub trait LinkFactory: Send + Sync {
    /// Connect, set up the channel, declare the topology, and return a live
    /// link.
    async fn open(&self) -> Result<Box<dyn Link>>;
}

/// A direct exchange to declare.
#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub name: String,
    pub durable: bool,
}

/// A queue to declare.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
}

/// A queue-to-exchange binding.
#[derive(Debug, Clone)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Declarative broker topology, applied idempotently on every (re)connect.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl Topology {
    /// Topology for a workflow process: request/result exchanges, the shared
    /// work queue, and this process's reply queue.
    ///
    /// The work queue is durable and never auto-deleted; the reply queue is
    /// durable but auto-deletes once its consumer goes away for good. Both
    /// bind under their own name as the routing key.
    pub fn workflow(config: &RpcConfig) -> Self {
        // ---
        Self {
            exchanges: vec![
                ExchangeSpec {
                    name: config.request_exchange.clone(),
                    durable: false,
                },
                ExchangeSpec {
                    name: config.result_exchange.clone(),
                    durable: false,
                },
            ],
            queues: vec![
                QueueSpec {
                    name: config.work_queue.clone(),
                    durable: true,
                    auto_delete: false,
                },
                QueueSpec {
                    name: config.reply_queue.clone(),
                    durable: true,
                    auto_delete: true,
                },
            ],
            bindings: vec![
                BindingSpec {
                    queue: config.work_queue.clone(),
                    exchange: config.request_exchange.clone(),
                    routing_key: config.work_queue.clone(),
                },
                BindingSpec {
                    queue: config.reply_queue.clone(),
                    exchange: config.result_exchange.clone(),
                    routing_key: config.reply_queue.clone(),
                },
            ],
        }
    }

    /// Topology for a worker process consuming one service queue.
    pub fn worker(request_exchange: &str, service_queue: &str) -> Self {
        // ---
        Self {
            exchanges: vec![ExchangeSpec {
                name: request_exchange.to_string(),
                durable: false,
            }],
            queues: vec![QueueSpec {
                name: service_queue.to_string(),
                durable: true,
                auto_delete: false,
            }],
            bindings: vec![BindingSpec {
                queue: service_queue.to_string(),
                exchange: request_exchange.to_string(),
                routing_key: service_queue.to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_workflow_topology_binds_queues_under_own_name() {
        // ---
        let config = RpcConfig::new("amqp://localhost:5672/%2f").with_reply_queue("workflow-t1");
        let topology = Topology::workflow(&config);

        assert_eq!(topology.exchanges.len(), 2);
        assert_eq!(topology.queues.len(), 2);

        let reply_binding = topology
            .bindings
            .iter()
            .find(|b| b.queue == "workflow-t1")
            .unwrap();
        assert_eq!(reply_binding.exchange, "ai-result");
        assert_eq!(reply_binding.routing_key, "workflow-t1");

        let reply_queue = topology
            .queues
            .iter()
            .find(|q| q.name == "workflow-t1")
            .unwrap();
        assert!(reply_queue.durable);
        assert!(reply_queue.auto_delete);
    }
}
