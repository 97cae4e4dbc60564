//! End-to-end call flows over the in-memory broker.

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use support::{image_params, spawn_script_worker, test_config, workflow_client, worker_conn};
use workflow_rpc::{
    //
    codec,
    ConsumerFn,
    CorrelationId,
    Delivery,
    Error,
    MemoryBroker,
    OutboundMessage,
    VideoLiteParams,
    VideoMode,
};

#[tokio::test]
async fn test_success_reply_resolves_artifact() {
    // ---
    let broker = MemoryBroker::new();
    let config = test_config();

    let _worker = spawn_script_worker(
        &broker,
        &config,
        "image2image",
        vec![json!({
            "messageType": "success",
            "statusCode": 200,
            "resultFile": ["out/0.jpg"],
        })],
    )
    .await;

    let (client, _conn, _factory) = workflow_client(&broker, &config).await;

    let artifact = client.image_to_image(&image_params()).await.unwrap();
    assert_eq!(artifact, "out/0.jpg");
    assert_eq!(client.pending_replies(), 0);
}

#[tokio::test]
async fn test_error_reply_rejects_with_worker_message() {
    // ---
    let broker = MemoryBroker::new();
    let config = test_config();

    let _worker = spawn_script_worker(
        &broker,
        &config,
        "image2image",
        vec![json!({
            "messageType": "error",
            "statusCode": 500,
            "errorMessage": "boom",
        })],
    )
    .await;

    let (client, _conn, _factory) = workflow_client(&broker, &config).await;

    let err = client.image_to_image(&image_params()).await.unwrap_err();
    assert!(matches!(err, Error::Remote(_)));
    assert_eq!(err.to_string(), "boom");
    assert_eq!(client.pending_replies(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_reply_times_out_and_retires_waiter() {
    // ---
    let broker = MemoryBroker::new();
    let config = test_config();

    // No worker at all: the request routes nowhere and no reply ever comes.
    let (client, _conn, _factory) = workflow_client(&broker, &config).await;
    let baseline = client.pending_replies();

    let err = client.image_to_image(&image_params()).await.unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.to_string().contains("Image2Image"));
    assert_eq!(client.pending_replies(), baseline);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_after_timeout_is_dropped() {
    // ---
    let broker = MemoryBroker::new();
    let config = test_config();

    // Worker that records the request metadata but never answers.
    let captured: Arc<Mutex<Option<(String, CorrelationId)>>> = Arc::new(Mutex::new(None));
    let worker = worker_conn(&broker, &config, "image2image").await;
    let handler: ConsumerFn = {
        let captured = Arc::clone(&captured);
        Arc::new(move |delivery: Delivery| {
            let captured = Arc::clone(&captured);
            Box::pin(async move {
                let meta = (
                    delivery.reply_to.clone().unwrap(),
                    delivery.correlation_id.clone().unwrap(),
                );
                *captured.lock().unwrap() = Some(meta);
                Ok(())
            })
        })
    };
    worker.consume("image2image", handler).await.unwrap();

    let (client, _conn, _factory) = workflow_client(&broker, &config).await;

    let err = client.image_to_image(&image_params()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(client.pending_replies(), 0);

    // The reply shows up after the caller already observed the timeout.
    let (reply_to, correlation_id) = captured.lock().unwrap().clone().unwrap();
    worker
        .publish(OutboundMessage {
            exchange: config.result_exchange.clone(),
            routing_key: reply_to,
            payload: codec::encode(&json!({
                "messageType": "success",
                "statusCode": 200,
                "resultFile": ["out/late.jpg"],
            }))
            .unwrap(),
            correlation_id: Some(correlation_id),
            reply_to: None,
            persistent: false,
        })
        .await
        .unwrap();

    // Let the demultiplexer see it; it must find no waiter and drop it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.pending_replies(), 0);
}

#[tokio::test]
async fn test_reply_for_other_correlation_id_does_not_resolve() {
    // ---
    let broker = MemoryBroker::new();
    let config = test_config();

    // Worker that first answers under a foreign correlation id, then under
    // the request's own id.
    let worker = worker_conn(&broker, &config, "image2image").await;
    let handler: ConsumerFn = {
        let publisher = worker.clone();
        let result_exchange = config.result_exchange.clone();
        Arc::new(move |delivery: Delivery| {
            let publisher = publisher.clone();
            let result_exchange = result_exchange.clone();
            Box::pin(async move {
                let reply_to = delivery.reply_to.clone().unwrap();

                let intruder = codec::encode(&json!({
                    "messageType": "success",
                    "statusCode": 200,
                    "resultFile": ["out/wrong.jpg"],
                }))?;
                publisher
                    .publish(OutboundMessage {
                        exchange: result_exchange.clone(),
                        routing_key: reply_to.clone(),
                        payload: intruder,
                        correlation_id: Some(CorrelationId::from("someone-else")),
                        reply_to: None,
                        persistent: false,
                    })
                    .await?;

                let genuine = codec::encode(&json!({
                    "messageType": "success",
                    "statusCode": 200,
                    "resultFile": ["out/right.jpg"],
                }))?;
                publisher
                    .publish(OutboundMessage {
                        exchange: result_exchange,
                        routing_key: reply_to,
                        payload: genuine,
                        correlation_id: delivery.correlation_id.clone(),
                        reply_to: None,
                        persistent: false,
                    })
                    .await?;

                Ok(())
            })
        })
    };
    worker.consume("image2image", handler).await.unwrap();

    let (client, _conn, _factory) = workflow_client(&broker, &config).await;

    let artifact = client.image_to_image(&image_params()).await.unwrap();
    assert_eq!(artifact, "out/right.jpg");
}

#[tokio::test]
async fn test_video_flow_resolves_only_on_completed() {
    // ---
    let broker = MemoryBroker::new();
    let config = test_config();

    let _worker = spawn_script_worker(
        &broker,
        &config,
        "ai-core-video-lite",
        vec![
            json!({
                "messageType": "success",
                "statusCode": 200,
                "videoId": "vid-1",
                "videoStatus": "processing",
                "responseTime": 1000,
            }),
            json!({
                "messageType": "success",
                "statusCode": 200,
                "videoId": "vid-1",
                "videoStatus": "rendering",
                "responseTime": 2000,
            }),
            json!({
                "messageType": "success",
                "statusCode": 200,
                "videoId": "vid-1",
                "videoStatus": "completed",
                "resultFile": "video-kissing/vid-1/0.mp4",
                "responseTime": 10000,
            }),
        ],
    )
    .await;

    let (client, _conn, _factory) = workflow_client(&broker, &config).await;

    let params = VideoLiteParams::new("uploads/in.jpg", VideoMode::Kissing);
    let artifacts = client.video_lite(&params).await.unwrap();

    // Scalar resultFile coerces to a one-element list.
    assert_eq!(artifacts, vec!["video-kissing/vid-1/0.mp4"]);
    assert_eq!(client.pending_replies(), 0);
}

#[tokio::test]
async fn test_video_flow_rejects_on_error_message() {
    // ---
    let broker = MemoryBroker::new();
    let config = test_config();

    let _worker = spawn_script_worker(
        &broker,
        &config,
        "ai-core-video-lite",
        vec![
            json!({
                "messageType": "success",
                "statusCode": 200,
                "videoStatus": "processing",
            }),
            json!({
                "messageType": "error",
                "statusCode": 500,
                "errorMessage": "render farm on fire",
            }),
        ],
    )
    .await;

    let (client, _conn, _factory) = workflow_client(&broker, &config).await;

    let params = VideoLiteParams::new("uploads/in.jpg", VideoMode::ImageToVideo);
    let err = client.video_lite(&params).await.unwrap_err();

    assert_eq!(err.to_string(), "render farm on fire");
}

#[tokio::test]
async fn test_concurrent_calls_settle_independently() {
    // ---
    let broker = MemoryBroker::new();
    let config = test_config();

    let _worker = spawn_script_worker(
        &broker,
        &config,
        "image2image",
        vec![json!({
            "messageType": "success",
            "statusCode": 200,
            "resultFile": ["out/0.jpg"],
        })],
    )
    .await;

    let (client, _conn, _factory) = workflow_client(&broker, &config).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        // ---
        let c = client.clone();
        handles.push(tokio::spawn(async move {
            c.image_to_image(&image_params()).await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "out/0.jpg");
    }
    assert_eq!(client.pending_replies(), 0);
}

#[tokio::test]
async fn test_request_payload_reaches_worker_with_injected_fields() {
    // ---
    let broker = MemoryBroker::new();
    let config = test_config();

    let seen: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(None));
    let worker = worker_conn(&broker, &config, "image2image").await;
    let handler: ConsumerFn = {
        let seen = Arc::clone(&seen);
        let publisher = worker.clone();
        let result_exchange = config.result_exchange.clone();
        Arc::new(move |delivery: Delivery| {
            let seen = Arc::clone(&seen);
            let publisher = publisher.clone();
            let result_exchange = result_exchange.clone();
            Box::pin(async move {
                let request: serde_json::Value = codec::decode(&delivery.payload)?;
                *seen.lock().unwrap() = Some(request);

                publisher
                    .publish(OutboundMessage {
                        exchange: result_exchange,
                        routing_key: delivery.reply_to.clone().unwrap(),
                        payload: codec::encode(&json!({
                            "messageType": "success",
                            "statusCode": 200,
                            "resultFile": ["out/0.jpg"],
                        }))?,
                        correlation_id: delivery.correlation_id.clone(),
                        reply_to: None,
                        persistent: false,
                    })
                    .await?;
                Ok(())
            })
        })
    };
    worker.consume("image2image", handler).await.unwrap();

    let (client, _conn, _factory) = workflow_client(&broker, &config).await;
    client.image_to_image(&image_params()).await.unwrap();

    let request = seen.lock().unwrap().clone().unwrap();
    assert_eq!(request["targetFeature"], "image2image");
    assert_eq!(request["prompt"], "golden hour");
    // Output path derives from the input file's location.
    assert_eq!(request["expectOutputPath"], "uploads/output/.jpg");
}
