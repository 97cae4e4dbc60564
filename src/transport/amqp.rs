//! AMQP transport implementation using `lapin`.
//!
//! [`AmqpFactory::open`] performs the full connect sequence against the
//! broker: connection, channel, idempotent topology declaration. The
//! returned [`AmqpLink`] flips its health signal to `Down` on any connection
//! error, at which point the connection manager discards it and asks the
//! factory for a new one.
//!
//! ## Delivery handling
//!
//! Each consumed queue gets its own pump task reading the `lapin` consumer
//! stream. Deliveries are acknowledged only after the handler returns `Ok`;
//! a handler error negatively acknowledges the delivery (requeue left to
//! broker policy) and the pump keeps running.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_lite::stream::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::macros::{log_debug, log_error, log_info, log_warn};
use crate::transport::{ConsumerFn, Delivery, Link, LinkFactory, LinkHealth, OutboundMessage};
use crate::{CorrelationId, Result, RpcConfig, Topology};

/// Factory for lapin-backed links.
pub struct AmqpFactory {
    config: RpcConfig,
    topology: Topology,
}

impl AmqpFactory {
    /// Factory for a workflow process (work queue + reply queue topology).
    pub fn new(config: RpcConfig) -> Arc<Self> {
        let topology = Topology::workflow(&config);
        Self::with_topology(config, topology)
    }

    /// Factory with an explicit topology.
    pub fn with_topology(config: RpcConfig, topology: Topology) -> Arc<Self> {
        Arc::new(Self { config, topology })
    }

    /// Broker URI with the configured heartbeat applied, unless the URI
    /// already carries one.
    fn uri(&self) -> String {
        // ---
        let uri = &self.config.uri;
        if uri.contains("heartbeat=") {
            return uri.clone();
        }

        let separator = if uri.contains('?') { '&' } else { '?' };
        format!("{uri}{separator}heartbeat={}", self.config.heartbeat_secs)
    }
}

#[async_trait::async_trait]
impl LinkFactory for AmqpFactory {
    async fn open(&self) -> Result<Box<dyn Link>> {
        // ---
        let uri = self.uri();
        log_info!("connecting to AMQP broker: {uri}");

        let connection = Connection::connect(&uri, ConnectionProperties::default()).await?;

        let (health_tx, _) = watch::channel(LinkHealth::Up);
        let health_tx = Arc::new(health_tx);
        {
            let health_tx = Arc::clone(&health_tx);
            connection.on_error(move |err| {
                log_error!("AMQP connection error: {err}");
                health_tx.send_replace(LinkHealth::Down);
            });
        }

        let channel = connection.create_channel().await?;
        declare_topology(&channel, &self.topology).await?;

        log_info!("connected to AMQP broker, topology declared");

        Ok(Box::new(AmqpLink {
            connection,
            channel,
            health_tx,
            pumps: Mutex::new(Vec::new()),
        }))
    }
}

/// Idempotent declaration of exchanges, queues, and bindings.
///
/// Safe to re-run after every reconnect even when the entities already
/// exist, as long as their attributes have not changed.
async fn declare_topology(channel: &Channel, topology: &Topology) -> Result<()> {
    // ---
    for exchange in &topology.exchanges {
        channel
            .exchange_declare(
                &exchange.name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
    }

    for queue in &topology.queues {
        channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    auto_delete: queue.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
    }

    for binding in &topology.bindings {
        channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    Ok(())
}

/// One live AMQP session.
struct AmqpLink {
    // ---
    connection: Connection,
    channel: Channel,
    health_tx: Arc<watch::Sender<LinkHealth>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait::async_trait]
impl Link for AmqpLink {
    async fn publish(&self, msg: OutboundMessage) -> Result<()> {
        // ---
        let mut properties = BasicProperties::default();
        if let Some(id) = &msg.correlation_id {
            properties = properties.with_correlation_id(id.as_str().into());
        }
        if let Some(reply_to) = &msg.reply_to {
            properties = properties.with_reply_to(reply_to.as_str().into());
        }
        if msg.persistent {
            properties = properties.with_delivery_mode(2);
        }

        self.channel
            .basic_publish(
                &msg.exchange,
                &msg.routing_key,
                BasicPublishOptions::default(),
                &msg.payload,
                properties,
            )
            .await?;

        log_debug!(
            "published to {}/{} ({} bytes)",
            msg.exchange,
            msg.routing_key,
            msg.payload.len()
        );
        Ok(())
    }

    async fn consume(&self, queue: &str, handler: ConsumerFn) -> Result<()> {
        // ---
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        log_info!("consuming queue: {queue}");

        let queue = queue.to_string();
        let pump = tokio::spawn(async move {
            let mut consumer = consumer;
            while let Some(next) = consumer.next().await {
                let delivery = match next {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        log_error!("consumer stream error on {queue}: {err}");
                        break;
                    }
                };

                let correlation_id = delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| CorrelationId::from(id.as_str()));
                let reply_to = delivery
                    .properties
                    .reply_to()
                    .as_ref()
                    .map(|queue| queue.as_str().to_string());

                let inbound = Delivery {
                    payload: Bytes::copy_from_slice(&delivery.data),
                    correlation_id,
                    reply_to,
                };

                match handler(inbound).await {
                    Ok(()) => {
                        if let Err(err) = delivery.acker.ack(BasicAckOptions::default()).await {
                            log_error!("failed to ack delivery on {queue}: {err}");
                        }
                    }
                    Err(err) => {
                        log_warn!("handler failed on {queue}, nacking: {err}");
                        let nack = BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        };
                        if let Err(err) = delivery.acker.nack(nack).await {
                            log_error!("failed to nack delivery on {queue}: {err}");
                        }
                    }
                }
            }

            log_debug!("consumer pump ended for queue: {queue}");
        });

        let mut pumps = lock_ignore_poison(&self.pumps);
        pumps.push(pump);
        Ok(())
    }

    fn health(&self) -> watch::Receiver<LinkHealth> {
        self.health_tx.subscribe()
    }

    async fn close(&self) -> Result<()> {
        // ---
        {
            let mut pumps = lock_ignore_poison(&self.pumps);
            for pump in pumps.drain(..) {
                pump.abort();
            }
        }

        self.health_tx.send_replace(LinkHealth::Down);

        let _ = self.channel.close(200, "normal shutdown".into()).await;
        let _ = self.connection.close(200, "normal shutdown".into()).await;

        Ok(())
    }
}

/// Acquire a mutex guard, ignoring poisoning.
///
/// The guarded state is a list of pump task handles; the worst outcome of a
/// poisoned lock is an unjoined task.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
