//! Workflow RPC client.
//!
//! This module contains [`WorkflowClient`], which submits jobs to downstream
//! worker services and awaits their replies over a shared broker connection.
//!
//! # Architecture
//!
//! The client registers a single consumer on the process's reply queue and
//! demultiplexes every inbound reply by correlation id (see [`demux`]).
//!
//! Each call mints a fresh correlation id, registers a waiter in the
//! [`waiters::WaiterRegistry`], and publishes the request with `replyTo` set
//! to the reply queue. The call then awaits its reply stream under the
//! feature's time-to-live. Exactly one terminal settlement is delivered per
//! call: a result, a worker error, or a timeout. Whichever way the call
//! exits, dropping the reply stream retires the correlation id, so late
//! replies find no waiter and are discarded by the demultiplexer.
//!
//! # Concurrency
//!
//! Any number of calls may be in flight at once; they share the connection
//! and reply queue, and the waiter map routes each interleaved reply to its
//! caller. No ordering is guaranteed across correlation ids.

mod demux;
mod waiters;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::time::{timeout_at, Instant};

use crate::connection::Connection;
use crate::features::{self, FeatureSpec, Flow};
use crate::macros::{log_debug, log_error};
use crate::protocol::{build_job_payload, VideoStatus, WorkerReply};
use crate::transport::OutboundMessage;
use crate::{codec, CorrelationId, Error, Result, RpcConfig};

use waiters::WaiterRegistry;

/// Client for submitting workflow jobs over a managed broker connection.
///
/// Cheap to clone (internally `Arc`-backed); clones share the reply queue
/// consumer and the waiter registry.
#[derive(Clone)]
pub struct WorkflowClient {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Connection,
    registry: Arc<WaiterRegistry>,
    config: RpcConfig,
}

impl WorkflowClient {
    /// Create a client on top of an established connection.
    ///
    /// Registers the reply-queue consumer; the connection replays that
    /// registration automatically after any reconnect.
    ///
    /// # Errors
    ///
    /// Fails when the reply-queue consumer cannot be established.
    pub async fn new(conn: Connection, config: RpcConfig) -> Result<Self> {
        // ---
        let registry = WaiterRegistry::new();

        conn.consume(
            config.reply_queue.clone(),
            demux::reply_consumer(Arc::clone(&registry)),
        )
        .await?;

        Ok(Self {
            inner: Arc::new(Inner {
                conn,
                registry,
                config,
            }),
        })
    }

    /// Submit a job and await its terminal reply.
    ///
    /// `params` must be a JSON object holding the feature's parameters; the
    /// routing fields are injected before publish. The call settles exactly
    /// once:
    ///
    /// - `Ok(reply)` on a successful terminal reply,
    /// - [`Error::Remote`] when the worker reports an error message,
    /// - [`Error::Timeout`] when no terminal reply arrives within the
    ///   feature's time-to-live.
    ///
    /// Staged video flows may receive several progress replies first; these
    /// are observed and logged but do not settle the call.
    pub async fn call(&self, feature: &FeatureSpec, params: Value) -> Result<WorkerReply> {
        // ---
        let correlation_id = CorrelationId::generate();
        let body = build_job_payload(feature, params, &correlation_id, Utc::now())?;
        let payload = codec::encode(&body)?;

        // Register before publishing so a fast reply can never race the
        // waiter. Dropping `replies` on any exit path retires the id.
        let mut replies = self.inner.registry.register(correlation_id.clone())?;

        self.inner
            .conn
            .publish(OutboundMessage {
                exchange: self.inner.config.request_exchange.clone(),
                routing_key: feature.target_service.to_string(),
                payload,
                correlation_id: Some(correlation_id.clone()),
                reply_to: Some(self.inner.config.reply_queue.clone()),
                persistent: true,
            })
            .await?;

        log_debug!(
            "{} request published (correlation_id: {correlation_id})",
            feature.display_name
        );

        let deadline = Instant::now() + feature.ttl;
        loop {
            let reply = match timeout_at(deadline, replies.recv()).await {
                Err(_elapsed) => {
                    log_error!(
                        "{} timeout (correlation_id: {correlation_id})",
                        feature.display_name
                    );
                    return Err(Error::Timeout {
                        operation: feature.display_name.to_string(),
                    });
                }
                Ok(None) => return Err(Error::ConnectionLost),
                Ok(Some(reply)) => reply,
            };

            match feature.flow {
                Flow::SingleReply => {
                    return match reply.error_message.clone() {
                        Some(message) => Err(Error::Remote(message)),
                        None => Ok(reply),
                    };
                }
                Flow::VideoStaged => {
                    if reply.video_status == Some(VideoStatus::Completed) {
                        return Ok(reply);
                    }
                    if let Some(message) = reply.error_message.clone() {
                        return Err(Error::Remote(message));
                    }
                    if reply.video_status == Some(VideoStatus::Failed) {
                        return Err(Error::Remote("video processing failed".to_string()));
                    }

                    log_debug!(
                        "{} progress: {:?} (correlation_id: {correlation_id})",
                        feature.display_name,
                        reply.video_status
                    );
                }
            }
        }
    }

    /// Run an image-to-image job and return the produced artifact path.
    pub async fn image_to_image(&self, params: &features::Image2ImageParams) -> Result<String> {
        // ---
        let reply = self
            .call(&features::IMAGE2IMAGE, serde_json::to_value(params)?)
            .await?;
        single_artifact(&features::IMAGE2IMAGE, reply)
    }

    /// Run a premium image job and return the produced artifact path.
    pub async fn image_premium(&self, params: &features::ImagePremiumParams) -> Result<String> {
        // ---
        let reply = self
            .call(&features::IMAGE2IMAGE_PREMIUM, serde_json::to_value(params)?)
            .await?;
        single_artifact(&features::IMAGE2IMAGE_PREMIUM, reply)
    }

    /// Run an image-combination job and return the produced artifact path.
    pub async fn combine_image(&self, params: &features::CombineImageParams) -> Result<String> {
        // ---
        let reply = self
            .call(&features::COMBINE_IMAGE, serde_json::to_value(params)?)
            .await?;
        single_artifact(&features::COMBINE_IMAGE, reply)
    }

    /// Run a staged video job and return the produced artifact paths.
    ///
    /// Resolves only when the worker reports `videoStatus: completed`;
    /// intermediate status replies keep the call waiting.
    pub async fn video_lite(&self, params: &features::VideoLiteParams) -> Result<Vec<String>> {
        // ---
        let reply = self
            .call(&features::VIDEO_LITE, serde_json::to_value(params)?)
            .await?;
        Ok(reply.result_file)
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_replies(&self) -> usize {
        self.inner.registry.len()
    }
}

/// Extract the single expected artifact from a terminal reply.
fn single_artifact(feature: &FeatureSpec, reply: WorkerReply) -> Result<String> {
    // ---
    reply.result_file.into_iter().next().ok_or_else(|| {
        Error::InvalidReply(format!(
            "{} reply contained no result file",
            feature.display_name
        ))
    })
}
