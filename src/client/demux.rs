//! Reply demultiplexer.
//!
//! A single long-lived consumer on the process's reply queue. Replies for
//! every in-flight request arrive interleaved here; each one is routed to
//! the waiter registered under its correlation id.

use std::sync::Arc;

use crate::client::waiters::WaiterRegistry;
use crate::macros::log_debug;
use crate::protocol::WorkerReply;
use crate::transport::{ConsumerFn, Delivery};
use crate::{codec, Error};

/// Build the consumer handler for the reply queue.
///
/// Per delivery: read the correlation id from the message metadata, look up
/// the waiter, and only then decode the body, so late or duplicate replies
/// whose waiter already retired are discarded without paying for a
/// decompress. A missing correlation id or an undecodable body returns an
/// error so the transport nacks the delivery; no specific waiter can be
/// failed in that case and the affected request times out on its own.
pub(crate) fn reply_consumer(registry: Arc<WaiterRegistry>) -> ConsumerFn {
    // ---
    Arc::new(move |delivery: Delivery| {
        let registry = Arc::clone(&registry);
        Box::pin(async move {
            let Some(correlation_id) = delivery.correlation_id else {
                return Err(Error::InvalidReply(
                    "reply is missing a correlation id".to_string(),
                ));
            };

            let reply: WorkerReply = codec::decode(&delivery.payload)?;

            if !registry.dispatch(&correlation_id, reply) {
                // Expected after a timeout already retired the waiter.
                log_debug!("no waiter for reply, dropped (correlation_id: {correlation_id})");
            }

            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::CorrelationId;
    use bytes::Bytes;
    use serde_json::json;

    fn delivery(correlation_id: Option<&str>, body: Bytes) -> Delivery {
        Delivery {
            payload: body,
            correlation_id: correlation_id.map(CorrelationId::from),
            reply_to: None,
        }
    }

    fn success_body() -> Bytes {
        codec::encode(&json!({
            "messageType": "success",
            "statusCode": 200,
            "resultFile": ["out/0.jpg"],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_routes_to_registered_waiter() {
        // ---
        let registry = WaiterRegistry::new();
        let id = CorrelationId::from("abc");
        let mut stream = registry.register(id.clone()).unwrap();

        let handler = reply_consumer(Arc::clone(&registry));
        handler(delivery(Some("abc"), success_body())).await.unwrap();

        let reply = stream.recv().await.unwrap();
        assert_eq!(reply.first_result(), Some("out/0.jpg"));
    }

    #[tokio::test]
    async fn test_unmatched_id_is_dropped_silently() {
        // ---
        let registry = WaiterRegistry::new();
        let handler = reply_consumer(Arc::clone(&registry));

        // Ok result: the delivery is acknowledged, not redelivered.
        let result = handler(delivery(Some("ghost"), success_body())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_correlation_id_is_an_error() {
        // ---
        let registry = WaiterRegistry::new();
        let handler = reply_consumer(Arc::clone(&registry));

        let result = handler(delivery(None, success_body())).await;
        assert!(matches!(result, Err(Error::InvalidReply(_))));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_an_error_and_waiter_untouched() {
        // ---
        let registry = WaiterRegistry::new();
        let id = CorrelationId::from("abc");
        let mut stream = registry.register(id.clone()).unwrap();

        let handler = reply_consumer(Arc::clone(&registry));
        let result = handler(delivery(Some("abc"), Bytes::from_static(b"junk"))).await;

        assert!(result.is_err());
        assert_eq!(registry.len(), 1);

        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), stream.recv()).await;
        assert!(pending.is_err());
    }
}
