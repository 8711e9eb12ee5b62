// archivetool/src/recovery/logic.rs
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{RecoveryConfig, resolve_archive_bucket, resolve_recovery_type};
use crate::errors::{AppError, Result};
use crate::recovery::retry::{RetryPolicy, head_with_retry, run_granule_attempts};
use crate::recovery::state::{FileRecovery, FileState, STATUS_ID_FAILED};
use crate::recovery::status::{
    FileStatusEntry, NewJobMessage, UpdateFileMessage, send_with_retry,
};
use crate::store::{ArchiveStore, HeadOutcome, RequestMethod, StatusQueue};

// ---------- input contract ----------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryEvent {
    pub input: RecoveryInput,
    #[serde(default)]
    pub config: RequestConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryInput {
    pub granules: Vec<GranuleInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GranuleInput {
    #[serde(default)]
    pub collection_id: Option<String>,
    pub granule_id: String,
    pub keys: Vec<KeyInput>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInput {
    pub key: String,
    pub dest_bucket: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    /// Overrides the environment's default archive bucket.
    #[serde(default)]
    pub default_bucket_override: Option<String>,
    /// Overrides the environment's default retrieval tier.
    #[serde(default)]
    pub default_recovery_type_override: Option<String>,
    #[serde(default)]
    pub s3_multipart_chunksize_mb: Option<i64>,
    /// Workflow-supplied job id; generated once per invocation when absent.
    #[serde(default)]
    pub async_operation_id: Option<String>,
}

// ---------- output contract ----------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutput {
    pub granules: Vec<GranuleOutput>,
    pub async_operation_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GranuleOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    pub granule_id: String,
    pub keys: Vec<KeyInput>,
    pub recover_files: Vec<FileOutput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutput {
    pub success: bool,
    #[serde(flatten)]
    pub status: FileStatusEntry,
}

impl FileOutput {
    fn from_file(file: &FileRecovery) -> Self {
        FileOutput {
            success: matches!(file.state, FileState::Success { .. }),
            status: FileStatusEntry::from_file(file),
        }
    }
}

// ---------- orchestration ----------

/// Processes a recovery request end to end.
///
/// Granules are processed in order. The first granule that ends with any
/// FAILED file stops the run, once its failures have been durably reported
/// through the status queue; later granules are not attempted.
pub async fn process_event<S: ArchiveStore, Q: StatusQueue>(
    event: RecoveryEvent,
    config: &RecoveryConfig,
    store: &S,
    queue: &Q,
) -> Result<RecoveryOutput> {
    let archive_bucket = resolve_archive_bucket(
        event.config.default_bucket_override.as_deref(),
        config.default_archive_bucket.as_deref(),
    )?;
    let recovery_type = resolve_recovery_type(
        event.config.default_recovery_type_override.as_deref(),
        config.default_recovery_type.as_deref(),
    )?;
    let multipart_chunksize_mb = event
        .config
        .s3_multipart_chunksize_mb
        .or(config.default_multipart_chunksize_mb);

    // One job id per invocation, shared by every granule.
    let job_id = event
        .config
        .async_operation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    println!(
        "🚀 Requesting restore of {} granule(s) from {} (tier {}, job {})",
        event.input.granules.len(),
        archive_bucket,
        recovery_type,
        job_id
    );

    let mut granules = Vec::with_capacity(event.input.granules.len());

    for granule in event.input.granules {
        let output = process_granule(
            granule,
            &job_id,
            &archive_bucket,
            &recovery_type,
            multipart_chunksize_mb,
            config,
            store,
            queue,
        )
        .await?;
        let any_failed = output.recover_files.iter().any(|f| !f.success);
        granules.push(output);
        if any_failed {
            return Err(AppError::RestoreRequest {
                archive_bucket,
            });
        }
    }

    Ok(RecoveryOutput {
        granules,
        async_operation_id: job_id,
    })
}

#[allow(clippy::too_many_arguments)]
async fn process_granule<S: ArchiveStore, Q: StatusQueue>(
    granule: GranuleInput,
    job_id: &str,
    archive_bucket: &str,
    recovery_type: &str,
    multipart_chunksize_mb: Option<i64>,
    config: &RecoveryConfig,
    store: &S,
    queue: &Q,
) -> Result<GranuleOutput> {
    println!("🔍 Processing granule {}", granule.granule_id);
    let now = Utc::now();

    let mut files: Vec<FileRecovery> = granule
        .keys
        .iter()
        .map(|k| {
            FileRecovery::new(
                k.key.clone(),
                k.dest_bucket.clone(),
                multipart_chunksize_mb,
                now,
            )
        })
        .collect();

    let policy = RetryPolicy {
        max_retries: config.max_retries,
        retry_sleep_secs: config.retry_sleep_secs,
    };

    // Existence and storage-class checks resolve some files before any
    // restore is attempted. A missing object cannot be fixed by retrying;
    // a transient head failure gets the same bounded budget as a restore
    // attempt and only fails the file once that budget is spent.
    for file in files.iter_mut() {
        match head_with_retry(store, archive_bucket, &file.key_path, policy).await {
            HeadOutcome::Found(metadata) => {
                if metadata.storage_class == "DEEP_ARCHIVE" && recovery_type == "Expedited" {
                    file.mark_failed(
                        format!(
                            "File '{}' from bucket '{}' is in storage class DEEP_ARCHIVE which does not support Expedited retrieval.",
                            file.key_path, archive_bucket
                        ),
                        Utc::now(),
                    );
                }
            }
            HeadOutcome::Missing => {
                file.mark_failed(
                    format!("{} does not exist in {}", file.key_path, archive_bucket),
                    Utc::now(),
                );
            }
            HeadOutcome::Error(error) => {
                file.mark_failed(error, Utc::now());
            }
        }
    }

    // Durable initial record for the whole granule, sent before any restore
    // attempt. Failure to establish it aborts the granule outright.
    let new_job = NewJobMessage {
        job_id: job_id.to_string(),
        granule_id: granule.granule_id.clone(),
        request_time: now,
        archive_destination: archive_bucket.to_string(),
        files: files.iter().map(FileStatusEntry::from_file).collect(),
    };
    send_with_retry(
        queue,
        &serde_json::to_string(&new_job)?,
        RequestMethod::NewJob,
        config.max_retries,
        config.retry_sleep_secs,
    )
    .await?;

    run_granule_attempts(
        store,
        archive_bucket,
        config.restore_expire_days,
        recovery_type,
        &mut files,
        policy,
    )
    .await;

    // Every file that ended FAILED gets its own durable status update.
    for file in files.iter().filter(|f| f.status_id() == STATUS_ID_FAILED) {
        let update = UpdateFileMessage::from_file(job_id, &granule.granule_id, file);
        send_with_retry(
            queue,
            &serde_json::to_string(&update)?,
            RequestMethod::UpdateFile,
            config.max_retries,
            config.retry_sleep_secs,
        )
        .await?;
    }

    Ok(GranuleOutput {
        collection_id: granule.collection_id,
        granule_id: granule.granule_id,
        keys: granule.keys,
        recover_files: files.iter().map(FileOutput::from_file).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileMetadata, RestoreOutcome};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Store double replaying a script of head outcomes per key; a
    /// single-element script repeats forever. Restore and enqueue calls are
    /// also appended to a shared sequence log so tests can assert ordering
    /// across the store/queue boundary.
    struct MockStore {
        heads: Mutex<HashMap<String, Vec<HeadOutcome>>>,
        head_calls: Mutex<Vec<String>>,
        restore_outcome: RestoreOutcome,
        restore_calls: Mutex<Vec<String>>,
        sequence: Arc<Mutex<Vec<String>>>,
    }

    impl MockStore {
        fn new(heads: Vec<(&str, Vec<HeadOutcome>)>, restore_outcome: RestoreOutcome) -> Self {
            MockStore {
                heads: Mutex::new(
                    heads
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v))
                        .collect(),
                ),
                head_calls: Mutex::new(Vec::new()),
                restore_outcome,
                restore_calls: Mutex::new(Vec::new()),
                sequence: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn with_sequence(mut self, sequence: Arc<Mutex<Vec<String>>>) -> Self {
            self.sequence = sequence;
            self
        }

        fn head_count(&self, key: &str) -> usize {
            self.head_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|k| *k == key)
                .count()
        }

        fn glacier_metadata() -> HeadOutcome {
            HeadOutcome::Found(FileMetadata {
                storage_class: "GLACIER".to_string(),
                etag: "etag".to_string(),
                size_in_bytes: 1024,
                version: None,
            })
        }
    }

    impl ArchiveStore for MockStore {
        async fn head(&self, _bucket: &str, key: &str) -> HeadOutcome {
            self.head_calls.lock().unwrap().push(key.to_string());
            let mut heads = self.heads.lock().unwrap();
            match heads.get_mut(key) {
                Some(script) if script.len() > 1 => script.remove(0),
                Some(script) => script[0].clone(),
                None => HeadOutcome::Missing,
            }
        }

        async fn initiate_restore(
            &self,
            _bucket: &str,
            key: &str,
            _restore_expire_days: i32,
            _recovery_type: &str,
        ) -> RestoreOutcome {
            self.restore_calls.lock().unwrap().push(key.to_string());
            self.sequence
                .lock()
                .unwrap()
                .push(format!("restore {}", key));
            self.restore_outcome.clone()
        }

        async fn ensure_gzip_metadata(&self, _bucket: &str, _key: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        messages: Mutex<Vec<(RequestMethod, String)>>,
        sequence: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingQueue {
        fn with_sequence(mut self, sequence: Arc<Mutex<Vec<String>>>) -> Self {
            self.sequence = sequence;
            self
        }

        fn count(&self, method: RequestMethod) -> usize {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| *m == method)
                .count()
        }
    }

    impl StatusQueue for RecordingQueue {
        async fn enqueue(
            &self,
            message_body: &str,
            method: RequestMethod,
        ) -> std::result::Result<String, String> {
            self.messages
                .lock()
                .unwrap()
                .push((method, message_body.to_string()));
            self.sequence
                .lock()
                .unwrap()
                .push(format!("enqueue {}", method.as_str()));
            Ok("msg".to_string())
        }
    }

    fn test_config() -> RecoveryConfig {
        RecoveryConfig {
            default_archive_bucket: Some("src-bucket".to_string()),
            default_recovery_type: None,
            restore_expire_days: 5,
            max_retries: 2,
            retry_sleep_secs: 0,
            default_multipart_chunksize_mb: None,
            status_update_queue_url: "https://example/queue.fifo".to_string(),
        }
    }

    fn event_with_keys(keys: Vec<KeyInput>) -> RecoveryEvent {
        RecoveryEvent {
            input: RecoveryInput {
                granules: vec![GranuleInput {
                    collection_id: Some("MOD09GQ___006".to_string()),
                    granule_id: "granule-1".to_string(),
                    keys,
                }],
            },
            config: RequestConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_clean_success_one_create_no_updates() -> anyhow::Result<()> {
        let store = MockStore::new(
            vec![
                ("a/f1.hdf", vec![MockStore::glacier_metadata()]),
                ("a/f2.hdf", vec![MockStore::glacier_metadata()]),
            ],
            RestoreOutcome::Accepted,
        );
        let queue = RecordingQueue::default();
        let event = event_with_keys(vec![
            KeyInput {
                key: "a/f1.hdf".to_string(),
                dest_bucket: "dest".to_string(),
            },
            KeyInput {
                key: "a/f2.hdf".to_string(),
                dest_bucket: "dest".to_string(),
            },
        ]);

        let output = process_event(event, &test_config(), &store, &queue).await?;

        assert_eq!(output.granules.len(), 1);
        // No file silently dropped: output entries match input keys.
        assert_eq!(output.granules[0].recover_files.len(), 2);
        assert!(output.granules[0].recover_files.iter().all(|f| f.success));
        assert_eq!(queue.count(RequestMethod::NewJob), 1);
        assert_eq!(queue.count(RequestMethod::UpdateFile), 0);
        assert_eq!(store.restore_calls.lock().unwrap().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_object_fails_immediately_and_raises() -> anyhow::Result<()> {
        let store = MockStore::new(vec![], RestoreOutcome::Accepted);
        let queue = RecordingQueue::default();
        let event = event_with_keys(vec![KeyInput {
            key: "a/gone.hdf".to_string(),
            dest_bucket: "dest".to_string(),
        }]);

        let result = process_event(event, &test_config(), &store, &queue).await;

        match result {
            Err(AppError::RestoreRequest { archive_bucket }) => {
                assert_eq!(archive_bucket, "src-bucket");
                let display = AppError::RestoreRequest {
                    archive_bucket,
                }
                .to_string();
                assert_eq!(display.matches("src-bucket").count(), 1);
            }
            other => panic!("expected RestoreRequest error, got {:?}", other),
        }

        // No restore was attempted for the missing object.
        assert!(store.restore_calls.lock().unwrap().is_empty());
        assert_eq!(queue.count(RequestMethod::NewJob), 1);
        assert_eq!(queue.count(RequestMethod::UpdateFile), 1);

        let messages = queue.messages.lock().unwrap();
        let (_, update_body) = messages
            .iter()
            .find(|(m, _)| *m == RequestMethod::UpdateFile)
            .unwrap();
        let update: serde_json::Value = serde_json::from_str(update_body)?;
        assert_eq!(update["statusId"], STATUS_ID_FAILED);
        assert_eq!(
            update["errorMessage"],
            "a/gone.hdf does not exist in src-bucket"
        );
        assert!(update.get("completionTime").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_expedited_deep_archive_fails_without_restore_call() -> anyhow::Result<()> {
        let store = MockStore::new(
            vec![(
                "a/cold.hdf",
                vec![HeadOutcome::Found(FileMetadata {
                    storage_class: "DEEP_ARCHIVE".to_string(),
                    etag: "etag".to_string(),
                    size_in_bytes: 1,
                    version: None,
                })],
            )],
            RestoreOutcome::Accepted,
        );
        let queue = RecordingQueue::default();
        let mut event = event_with_keys(vec![KeyInput {
            key: "a/cold.hdf".to_string(),
            dest_bucket: "dest".to_string(),
        }]);
        event.config.default_recovery_type_override = Some("Expedited".to_string());

        let result = process_event(event, &test_config(), &store, &queue).await;

        assert!(matches!(result, Err(AppError::RestoreRequest { .. })));
        assert!(store.restore_calls.lock().unwrap().is_empty());

        let messages = queue.messages.lock().unwrap();
        let (_, update_body) = messages
            .iter()
            .find(|(m, _)| *m == RequestMethod::UpdateFile)
            .unwrap();
        let update: serde_json::Value = serde_json::from_str(update_body)?;
        let error = update["errorMessage"].as_str().unwrap();
        assert!(error.contains("DEEP_ARCHIVE"));
        assert!(error.contains("Expedited"));
        Ok(())
    }

    #[tokio::test]
    async fn test_supplied_job_id_is_reused() -> anyhow::Result<()> {
        let store = MockStore::new(
            vec![("a/f1.hdf", vec![MockStore::glacier_metadata()])],
            RestoreOutcome::Accepted,
        );
        let queue = RecordingQueue::default();
        let mut event = event_with_keys(vec![KeyInput {
            key: "a/f1.hdf".to_string(),
            dest_bucket: "dest".to_string(),
        }]);
        event.config.async_operation_id = Some("job-abc".to_string());

        let output = process_event(event, &test_config(), &store, &queue).await?;
        assert_eq!(output.async_operation_id, "job-abc");

        let messages = queue.messages.lock().unwrap();
        let (_, body) = &messages[0];
        let new_job: serde_json::Value = serde_json::from_str(body)?;
        assert_eq!(new_job["jobId"], "job-abc");
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_each_failure() -> anyhow::Result<()> {
        let store = MockStore::new(
            vec![("a/f1.hdf", vec![MockStore::glacier_metadata()])],
            RestoreOutcome::Retryable("SlowDown".to_string()),
        );
        let queue = RecordingQueue::default();
        let event = event_with_keys(vec![KeyInput {
            key: "a/f1.hdf".to_string(),
            dest_bucket: "dest".to_string(),
        }]);

        let result = process_event(event, &test_config(), &store, &queue).await;

        assert!(matches!(result, Err(AppError::RestoreRequest { .. })));
        // max_retries = 2 gives three passes over the lone file.
        assert_eq!(store.restore_calls.lock().unwrap().len(), 3);
        assert_eq!(queue.count(RequestMethod::UpdateFile), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_transient_head_error_is_retried_before_restore() -> anyhow::Result<()> {
        let store = MockStore::new(
            vec![(
                "a/f1.hdf",
                vec![
                    HeadOutcome::Error("SlowDown".to_string()),
                    MockStore::glacier_metadata(),
                ],
            )],
            RestoreOutcome::Accepted,
        );
        let queue = RecordingQueue::default();
        let event = event_with_keys(vec![KeyInput {
            key: "a/f1.hdf".to_string(),
            dest_bucket: "dest".to_string(),
        }]);

        let output = process_event(event, &test_config(), &store, &queue).await?;

        // The second head attempt cleared the throttle and the file went on
        // to a normal restore.
        assert!(output.granules[0].recover_files[0].success);
        assert_eq!(store.head_count("a/f1.hdf"), 2);
        assert_eq!(store.restore_calls.lock().unwrap().len(), 1);
        assert_eq!(queue.count(RequestMethod::UpdateFile), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_persistent_head_error_fails_only_after_exhaustion() -> anyhow::Result<()> {
        let store = MockStore::new(
            vec![("a/f1.hdf", vec![HeadOutcome::Error("SlowDown".to_string())])],
            RestoreOutcome::Accepted,
        );
        let queue = RecordingQueue::default();
        let event = event_with_keys(vec![KeyInput {
            key: "a/f1.hdf".to_string(),
            dest_bucket: "dest".to_string(),
        }]);

        let result = process_event(event, &test_config(), &store, &queue).await;

        assert!(matches!(result, Err(AppError::RestoreRequest { .. })));
        // max_retries = 2 gives three head attempts before the file fails.
        assert_eq!(store.head_count("a/f1.hdf"), 3);
        assert!(store.restore_calls.lock().unwrap().is_empty());
        assert_eq!(queue.count(RequestMethod::UpdateFile), 1);

        let messages = queue.messages.lock().unwrap();
        let (_, update_body) = messages
            .iter()
            .find(|(m, _)| *m == RequestMethod::UpdateFile)
            .unwrap();
        let update: serde_json::Value = serde_json::from_str(update_body)?;
        assert_eq!(update["statusId"], STATUS_ID_FAILED);
        let error = update["errorMessage"].as_str().unwrap();
        assert!(error.contains("after 3 attempts"));
        assert!(error.contains("SlowDown"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_granule_stops_later_granules() -> anyhow::Result<()> {
        let store = MockStore::new(
            vec![("b/f2.hdf", vec![MockStore::glacier_metadata()])],
            RestoreOutcome::Accepted,
        );
        let queue = RecordingQueue::default();
        let event = RecoveryEvent {
            input: RecoveryInput {
                granules: vec![
                    GranuleInput {
                        collection_id: None,
                        granule_id: "granule-1".to_string(),
                        keys: vec![KeyInput {
                            key: "a/gone.hdf".to_string(),
                            dest_bucket: "dest".to_string(),
                        }],
                    },
                    GranuleInput {
                        collection_id: None,
                        granule_id: "granule-2".to_string(),
                        keys: vec![KeyInput {
                            key: "b/f2.hdf".to_string(),
                            dest_bucket: "dest".to_string(),
                        }],
                    },
                ],
            },
            config: RequestConfig::default(),
        };

        let result = process_event(event, &test_config(), &store, &queue).await;

        assert!(matches!(result, Err(AppError::RestoreRequest { .. })));
        // The first granule's failure was durably reported, then the run
        // stopped: the second granule was never touched.
        assert_eq!(queue.count(RequestMethod::NewJob), 1);
        assert_eq!(queue.count(RequestMethod::UpdateFile), 1);
        assert_eq!(store.head_count("b/f2.hdf"), 0);
        assert!(store.restore_calls.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_create_status_is_enqueued_before_first_restore() -> anyhow::Result<()> {
        let sequence = Arc::new(Mutex::new(Vec::new()));
        let store = MockStore::new(
            vec![
                ("a/f1.hdf", vec![MockStore::glacier_metadata()]),
                ("a/f2.hdf", vec![MockStore::glacier_metadata()]),
            ],
            RestoreOutcome::Accepted,
        )
        .with_sequence(sequence.clone());
        let queue = RecordingQueue::default().with_sequence(sequence.clone());
        let event = event_with_keys(vec![
            KeyInput {
                key: "a/f1.hdf".to_string(),
                dest_bucket: "dest".to_string(),
            },
            KeyInput {
                key: "a/f2.hdf".to_string(),
                dest_bucket: "dest".to_string(),
            },
        ]);

        process_event(event, &test_config(), &store, &queue).await?;

        let sequence = sequence.lock().unwrap();
        assert_eq!(sequence[0], "enqueue new_job");
        assert!(
            sequence[1..].iter().all(|e| e.starts_with("restore ")),
            "unexpected sequence: {:?}",
            *sequence
        );
        assert_eq!(sequence.len(), 3);
        Ok(())
    }
}
