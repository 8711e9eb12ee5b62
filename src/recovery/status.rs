// archivetool/src/recovery/status.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::errors::AppError;
use crate::recovery::state::FileRecovery;
use crate::store::{RequestMethod, StatusQueue};

/// Initial "create status" batch message covering every file of a granule.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJobMessage {
    pub job_id: String,
    pub granule_id: String,
    pub request_time: DateTime<Utc>,
    pub archive_destination: String,
    pub files: Vec<FileStatusEntry>,
}

/// Follow-up message for a single file whose status changed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileMessage {
    pub job_id: String,
    pub granule_id: String,
    pub filename: String,
    pub key_path: String,
    pub last_update: DateTime<Utc>,
    pub status_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatusEntry {
    pub filename: String,
    pub key_path: String,
    pub restore_destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart_chunksize_mb: Option<i64>,
    pub status_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub request_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

impl FileStatusEntry {
    pub fn from_file(file: &FileRecovery) -> Self {
        FileStatusEntry {
            filename: file.filename.clone(),
            key_path: file.key_path.clone(),
            restore_destination: file.restore_destination.clone(),
            multipart_chunksize_mb: file.multipart_chunksize_mb,
            status_id: file.status_id(),
            error_message: file.error_message().map(|m| m.to_string()),
            request_time: file.request_time,
            last_update: file.last_update,
            completion_time: file.completion_time(),
        }
    }
}

impl UpdateFileMessage {
    pub fn from_file(job_id: &str, granule_id: &str, file: &FileRecovery) -> Self {
        UpdateFileMessage {
            job_id: job_id.to_string(),
            granule_id: granule_id.to_string(),
            filename: file.filename.clone(),
            key_path: file.key_path.clone(),
            last_update: file.last_update,
            status_id: file.status_id(),
            error_message: file.error_message().map(|m| m.to_string()),
            completion_time: file.completion_time(),
        }
    }
}

/// Enqueues a status message with a bounded local retry.
///
/// The queue is the durable record of recovery progress, so exhausting this
/// budget is fatal for the whole granule, not just for one file.
pub async fn send_with_retry<Q: StatusQueue>(
    queue: &Q,
    message_body: &str,
    method: RequestMethod,
    max_retries: u32,
    retry_sleep_secs: u64,
) -> crate::errors::Result<String> {
    let mut last_error = String::new();
    for attempt in 0..=max_retries {
        match queue.enqueue(message_body, method).await {
            Ok(message_id) => return Ok(message_id),
            Err(e) => {
                eprintln!(
                    "Warning: status enqueue attempt {}/{} failed: {}",
                    attempt + 1,
                    max_retries + 1,
                    e
                );
                last_error = e;
            }
        }
        if attempt < max_retries {
            tokio::time::sleep(Duration::from_secs(retry_sleep_secs)).await;
        }
    }
    Err(AppError::Queue(format!(
        "Giving up on {} status message after {} attempts: {}",
        method.as_str(),
        max_retries + 1,
        last_error
    )))
}
