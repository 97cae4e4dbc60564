//! Broker connection manager.
//!
//! [`Connection`] owns the single live [`Link`] for a process behind a
//! background actor task. All publishing and consumer registration is
//! serialized through the actor, which also supervises the link's health:
//! when the link goes down, the actor reconnects with a bounded number of
//! fixed-delay attempts, re-declaring topology (via the factory) and
//! re-subscribing every registered consumer in registration order before it
//! serves another command. Exhausting the attempts marks the connection
//! [`ConnectionState::Failed`] and fails subsequent operations; it never
//! terminates the process.
//!
//! Requests in flight when the link drops are not replayed; their waiters
//! time out normally. Delivery is at-most-once from the caller's
//! perspective for anything published between the last ack and the drop.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;

use crate::config::ReconnectPolicy;
use crate::macros::{log_error, log_info, log_warn};
use crate::transport::{ConsumerFn, Link, LinkFactory, LinkHealth, OutboundMessage};
use crate::{Error, Result};

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; initial state and the state after `close()`.
    Disconnected,

    /// First connect in progress.
    Connecting,

    /// A live link is serving traffic.
    Connected,

    /// The link dropped; reconnection attempts are running.
    Reconnecting,

    /// Reconnection attempts are exhausted. Terminal.
    Failed,
}

enum Cmd {
    Publish {
        msg: OutboundMessage,
        resp: oneshot::Sender<Result<()>>,
    },
    Consume {
        queue: String,
        handler: ConsumerFn,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

/// Managed broker connection.
///
/// Cheap to clone (internally `Arc`-backed); clones share the same link.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    cmd_tx: mpsc::Sender<Cmd>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Connection {
    /// Open the initial link and start the supervising actor.
    ///
    /// # Errors
    ///
    /// Returns the factory's error when the first connect fails; automatic
    /// reconnection only applies to links lost *after* this call succeeds.
    pub async fn connect(
        factory: Arc<dyn LinkFactory>,
        policy: ReconnectPolicy,
    ) -> Result<Self> {
        // ---
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let link = match factory.open().await {
            Ok(link) => link,
            Err(err) => {
                state_tx.send_replace(ConnectionState::Disconnected);
                return Err(err);
            }
        };
        state_tx.send_replace(ConnectionState::Connected);

        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let supervisor = Supervisor {
            factory,
            policy,
            link,
            consumers: Vec::new(),
            cmd_rx,
            state_tx,
            fatal: false,
        };
        tokio::spawn(supervisor.run());

        Ok(Self {
            inner: Arc::new(Inner { cmd_tx, state_rx }),
        })
    }

    /// Publish a message over the managed link.
    ///
    /// # Errors
    ///
    /// Fails synchronously when the link rejects the publish or the
    /// connection is dead; nothing is retried here.
    pub async fn publish(&self, msg: OutboundMessage) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.send_cmd(Cmd::Publish { msg, resp: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Register a long-lived consumer on `queue`.
    ///
    /// The registration outlives any individual link: after a reconnect the
    /// handler is re-subscribed automatically, in registration order.
    /// Registering a second handler for the same queue replaces the first.
    pub async fn consume(&self, queue: impl Into<String>, handler: ConsumerFn) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.send_cmd(Cmd::Consume {
            queue: queue.into(),
            handler,
            resp: tx,
        })
        .await?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Watch connection state transitions, including the fatal
    /// [`ConnectionState::Failed`].
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Close the link and stop the actor.
    pub async fn close(&self) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.send_cmd(Cmd::Close { resp: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }

    async fn send_cmd(&self, cmd: Cmd) -> Result<()> {
        self.inner
            .cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::ConnectionLost)
    }
}

/// Background actor owning the live link.
struct Supervisor {
    factory: Arc<dyn LinkFactory>,
    policy: ReconnectPolicy,
    link: Box<dyn Link>,
    // Registration order matters: consumers are replayed in this order
    // after a reconnect.
    consumers: Vec<(String, ConsumerFn)>,
    cmd_rx: mpsc::Receiver<Cmd>,
    state_tx: watch::Sender<ConnectionState>,
    fatal: bool,
}

impl Supervisor {
    async fn run(mut self) {
        // ---
        let mut health = self.link.health();

        loop {
            tokio::select! {
                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        None => {
                            // Every handle dropped.
                            let _ = self.link.close().await;
                            self.state_tx.send_replace(ConnectionState::Disconnected);
                            break;
                        }
                        Some(Cmd::Close { resp }) => {
                            let result = self.link.close().await;
                            self.state_tx.send_replace(ConnectionState::Disconnected);
                            let _ = resp.send(result);
                            break;
                        }
                        Some(cmd) => self.handle_cmd(cmd).await,
                    }
                }
                _ = async { let _ = health.wait_for(|h| *h == LinkHealth::Down).await; }, if !self.fatal => {
                    // A closed watch means the link is gone entirely;
                    // either way the session is dead.
                    match self.reconnect().await {
                        Ok(()) => {
                            health = self.link.health();
                        }
                        Err(err) => {
                            log_error!("{err}");
                            self.fatal = true;
                        }
                    }
                }
            }
        }
    }

    async fn handle_cmd(&mut self, cmd: Cmd) {
        // ---
        match cmd {
            Cmd::Publish { msg, resp } => {
                let result = if self.fatal {
                    Err(self.fatal_error())
                } else {
                    self.link.publish(msg).await
                };
                let _ = resp.send(result);
            }
            Cmd::Consume {
                queue,
                handler,
                resp,
            } => {
                if self.fatal {
                    let _ = resp.send(Err(self.fatal_error()));
                    return;
                }

                let result = self.link.consume(&queue, Arc::clone(&handler)).await;
                if result.is_ok() {
                    match self.consumers.iter_mut().find(|(q, _)| *q == queue) {
                        Some(slot) => slot.1 = handler,
                        None => self.consumers.push((queue, handler)),
                    }
                }
                let _ = resp.send(result);
            }
            Cmd::Close { .. } => unreachable!("Close is handled in run()"),
        }
    }

    /// Reconnect with bounded, fixed-delay attempts.
    ///
    /// Each attempt re-runs the full connect sequence through the factory
    /// and replays every consumer registration before the connection is
    /// reported healthy again. Queued commands wait until this returns, so
    /// no publish can observe a link whose reply consumers are missing.
    async fn reconnect(&mut self) -> Result<()> {
        // ---
        self.state_tx.send_replace(ConnectionState::Reconnecting);
        log_warn!(
            "broker connection lost, reconnecting (up to {} attempts)",
            self.policy.max_attempts
        );

        let mut attempt = 0u32;
        while attempt < self.policy.max_attempts {
            attempt += 1;
            sleep(self.policy.delay).await;

            let link = match self.factory.open().await {
                Ok(link) => link,
                Err(err) => {
                    log_warn!(
                        "reconnect attempt {attempt}/{} failed: {err}",
                        self.policy.max_attempts
                    );
                    continue;
                }
            };

            match self.replay_consumers(link.as_ref()).await {
                Ok(()) => {
                    self.link = link;
                    self.state_tx.send_replace(ConnectionState::Connected);
                    log_info!(
                        "reconnected to broker, restored {} consumer(s)",
                        self.consumers.len()
                    );
                    return Ok(());
                }
                Err(err) => {
                    log_warn!(
                        "reconnect attempt {attempt}/{} failed restoring consumers: {err}",
                        self.policy.max_attempts
                    );
                    let _ = link.close().await;
                }
            }
        }

        self.state_tx.send_replace(ConnectionState::Failed);
        Err(self.fatal_error())
    }

    async fn replay_consumers(&self, link: &dyn Link) -> Result<()> {
        // ---
        for (queue, handler) in &self.consumers {
            link.consume(queue, Arc::clone(handler)).await?;
        }
        Ok(())
    }

    fn fatal_error(&self) -> Error {
        Error::Fatal {
            attempts: self.policy.max_attempts,
        }
    }
}
