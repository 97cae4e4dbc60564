//! Outbound job payload assembly.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::features::{FeatureSpec, Flow};
use crate::protocol::output_dir_path;
use crate::protocol::VideoStatus;
use crate::{CorrelationId, Error, Result};

/// Build the request body for one job.
///
/// Starts from the caller's parameter object and injects the routing fields
/// workers rely on: `targetFeature` and `expectOutputPath`. Staged video
/// flows additionally get a fresh `videoId` and an initial `videoStatus` of
/// `queueing`. The `file` parameter, when present and non-empty, anchors the
/// output path next to the input artifact.
pub(crate) fn build_job_payload(
    feature: &FeatureSpec,
    params: Value,
    correlation_id: &CorrelationId,
    now: DateTime<Utc>,
) -> Result<Value> {
    // ---
    let mut body: Map<String, Value> = match params {
        Value::Object(map) => map,
        other => {
            return Err(Error::InvalidRequest(format!(
                "job parameters must be a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };

    let file_input = body
        .get("file")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let expect_output_path = output_dir_path(
        file_input.as_deref(),
        feature.target_service,
        feature.target_feature,
        correlation_id.as_str(),
        now,
    );

    if feature.flow == Flow::VideoStaged {
        body.insert(
            "videoId".to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
        body.insert(
            "videoStatus".to_string(),
            serde_json::to_value(VideoStatus::Queueing)?,
        );
    }

    body.insert(
        "targetFeature".to_string(),
        Value::String(feature.target_feature.to_string()),
    );
    body.insert(
        "expectOutputPath".to_string(),
        Value::String(expect_output_path),
    );

    Ok(Value::Object(body))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::features;
    use chrono::TimeZone;
    use serde_json::json;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_injects_target_feature_and_output_path() {
        // ---
        let id = CorrelationId::from("abc");
        let body = build_job_payload(
            &features::IMAGE2IMAGE,
            json!({"file": "uploads/in.jpg", "prompt": "sunset"}),
            &id,
            noon(),
        )
        .unwrap();

        assert_eq!(body["targetFeature"], "image2image");
        assert_eq!(body["expectOutputPath"], "uploads/output/.jpg");
        assert_eq!(body["prompt"], "sunset");
    }

    #[test]
    fn test_missing_file_uses_bucketed_path() {
        // ---
        let id = CorrelationId::from("abc");
        let body = build_job_payload(&features::IMAGE2IMAGE, json!({}), &id, noon()).unwrap();

        assert_eq!(
            body["expectOutputPath"],
            "image2image/image2image/2025-03-14/abc/output"
        );
    }

    #[test]
    fn test_staged_flow_gets_video_fields() {
        // ---
        let id = CorrelationId::from("abc");
        let body =
            build_job_payload(&features::VIDEO_LITE, json!({"mode": "i2v"}), &id, noon()).unwrap();

        assert_eq!(body["videoStatus"], "queueing");
        assert!(body["videoId"].as_str().is_some_and(|v| !v.is_empty()));
    }

    #[test]
    fn test_rejects_non_object_params() {
        // ---
        let id = CorrelationId::from("abc");
        let err = build_job_payload(&features::IMAGE2IMAGE, json!([1, 2]), &id, noon());

        assert!(matches!(err, Err(Error::InvalidRequest(_))));
    }
}
