//! Reply schema for worker responses.

use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle states reported by staged video jobs.
///
/// `Completed` and `Failed` are terminal; the rest are progress updates that
/// keep the call waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Queueing,
    Processing,
    Rendering,
    Completed,
    Failed,
}

impl VideoStatus {
    /// Whether this status ends the job, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }
}

/// A decoded worker reply.
///
/// All fields mirror the wire schema. `result_file` is canonically a list:
/// workers send either a single path or an array, and a scalar is coerced to
/// a one-element list at decode time so call sites never branch on shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReply {
    /// Outcome class, e.g. `"success"` or `"error"`.
    pub message_type: String,

    /// Human-readable failure text; present only on application errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// HTTP-style status code set by the worker.
    pub status_code: u16,

    /// Worker-side processing time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,

    /// Produced artifact path(s). Scalar wire values are coerced to a
    /// one-element list; absent and `null` both decode to an empty list.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub result_file: Vec<String>,

    /// Original image width, when the worker reports it.
    ///
    /// Wire name kept as the workers send it.
    #[serde(
        default,
        rename = "imageOriginalWith",
        skip_serializing_if = "Option::is_none"
    )]
    pub image_original_width: Option<u32>,

    /// Original image height, when the worker reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_original_height: Option<u32>,

    /// NSFW classification of the produced artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<bool>,

    /// Identifier of the video job, for staged flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,

    /// Stage of the video job, for staged flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_status: Option<VideoStatus>,
}

impl WorkerReply {
    /// First produced artifact path, if any.
    pub fn first_result(&self) -> Option<&str> {
        self.result_file.first().map(String::as_str)
    }
}

/// Accepts `"path"`, `["path", ...]`, `null`, or nothing, always yielding a
/// list.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(OneOrMany::One(path)) => Ok(vec![path]),
        Some(OneOrMany::Many(paths)) => Ok(paths),
    }
}
