//! Deterministic artifact paths shared with downstream workers.
//!
//! Requests carry an `expectOutputPath` so workers and callers agree on
//! where produced artifacts land without a second round-trip. Paths bucket
//! by calendar date; jobs submitted in the final two minutes of a day are
//! bucketed into the next day so a job cannot straddle the rollover.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, Timelike, Utc};

/// Seconds from midnight at 23:58:00.
const DAY_ROLLOVER_SECS: u32 = 86_280;

/// `{service}/{feature}/{yyyy-mm-dd}/{correlation_id}`, skipping empty
/// segments.
pub(crate) fn input_dir_path(
    target_service: &str,
    target_feature: &str,
    correlation_id: &str,
    now: DateTime<Utc>,
) -> String {
    // ---
    let date = date_bucket(now);

    [target_service, target_feature, date.as_str(), correlation_id]
        .iter()
        .filter(|segment| !segment.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Output directory for a job.
///
/// Without a file input this is the input dir plus `/output`. With a file
/// input, the output lands next to the input: `{parent}/output/{.ext}` when
/// the input has an extension, `{input}/output` when it does not.
pub(crate) fn output_dir_path(
    file_input: Option<&str>,
    target_service: &str,
    target_feature: &str,
    correlation_id: &str,
    now: DateTime<Utc>,
) -> String {
    // ---
    let file_input = file_input.filter(|f| !f.is_empty());

    let path: PathBuf = match file_input {
        None => {
            let dir = input_dir_path(target_service, target_feature, correlation_id, now);
            Path::new(&dir).join("output")
        }
        Some(file) => {
            let path = Path::new(file);
            match path.extension() {
                Some(ext) => path
                    .parent()
                    .unwrap_or_else(|| Path::new(""))
                    .join("output")
                    .join(format!(".{}", ext.to_string_lossy())),
                None => path.join("output"),
            }
        }
    };

    path.to_string_lossy().into_owned()
}

/// Calendar date for bucketing, rolled to the next day within the last two
/// minutes before midnight.
fn date_bucket(now: DateTime<Utc>) -> String {
    // ---
    let date = now.date_naive();
    let date = if now.time().num_seconds_from_midnight() >= DAY_ROLLOVER_SECS {
        date.checked_add_days(Days::new(1)).unwrap_or(date)
    } else {
        date
    };

    date.format("%Y-%m-%d").to_string()
}
