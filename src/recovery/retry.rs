// archivetool/src/recovery/retry.rs
use chrono::Utc;
use std::time::Duration;

use crate::recovery::state::FileRecovery;
use crate::store::{ArchiveStore, HeadOutcome, RestoreOutcome};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_sleep_secs: u64,
}

/// Existence check with the same bounded budget as the restore loop.
///
/// `Found` and `Missing` are definitive answers and return immediately; a
/// transient head failure is re-attempted up to `max_retries + 1` times with
/// the fixed inter-attempt sleep. Exhaustion returns the last error wrapped
/// with the attempt count.
pub async fn head_with_retry<S: ArchiveStore>(
    store: &S,
    bucket: &str,
    key: &str,
    policy: RetryPolicy,
) -> HeadOutcome {
    let mut last_error = String::new();
    for attempt in 0..=policy.max_retries {
        match store.head(bucket, key).await {
            HeadOutcome::Error(error) => {
                eprintln!(
                    "Warning: attempt {}/{} to check s3://{}/{} failed: {}",
                    attempt + 1,
                    policy.max_retries + 1,
                    bucket,
                    key,
                    error
                );
                last_error = error;
            }
            outcome => return outcome,
        }
        if attempt < policy.max_retries {
            tokio::time::sleep(Duration::from_secs(policy.retry_sleep_secs)).await;
        }
    }
    HeadOutcome::Error(format!(
        "Unable to check '{}' after {} attempts: {}",
        key,
        policy.max_retries + 1,
        last_error
    ))
}

/// Drives restore-initiate attempts for every file of one granule.
///
/// The attempt counter is shared by the whole granule: each pass re-attempts
/// every still-pending file once, up to `max_retries + 1` passes, sleeping
/// between passes but not after the last. Files the loop cannot resolve are
/// forced to FAILED with the last recorded error.
pub async fn run_granule_attempts<S: ArchiveStore>(
    store: &S,
    archive_bucket: &str,
    restore_expire_days: i32,
    recovery_type: &str,
    files: &mut [FileRecovery],
    policy: RetryPolicy,
) {
    let mut last_errors: Vec<String> = vec![String::new(); files.len()];

    for attempt in 0..=policy.max_retries {
        for (i, file) in files.iter_mut().enumerate() {
            if file.is_resolved() {
                continue;
            }
            match store
                .initiate_restore(
                    archive_bucket,
                    &file.key_path,
                    restore_expire_days,
                    recovery_type,
                )
                .await
            {
                RestoreOutcome::Accepted => {
                    println!(
                        "✓ Restore requested for s3://{}/{}",
                        archive_bucket, file.key_path
                    );
                    file.mark_success(Utc::now());
                }
                RestoreOutcome::Retryable(error) => {
                    eprintln!(
                        "Warning: attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        policy.max_retries + 1,
                        file.key_path,
                        error
                    );
                    file.record_attempt_error(Utc::now());
                    last_errors[i] = error;
                }
                RestoreOutcome::Terminal(error) => {
                    eprintln!("❌ Giving up on {}: {}", file.key_path, error);
                    file.mark_failed(error, Utc::now());
                }
            }
        }

        if files.iter().all(|f| f.is_resolved()) {
            break;
        }
        if attempt < policy.max_retries {
            tokio::time::sleep(Duration::from_secs(policy.retry_sleep_secs)).await;
        }
    }

    // Whatever is still pending has exhausted the granule's attempt budget.
    let now = Utc::now();
    for (i, file) in files.iter_mut().enumerate() {
        if !file.is_resolved() {
            let error = format!(
                "Unable to process '{}' after {} attempts: {}",
                file.key_path,
                policy.max_retries + 1,
                last_errors[i]
            );
            file.mark_failed(error, now);
        }
    }
}
