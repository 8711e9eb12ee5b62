// archivetool/src/recovery/state.rs
use chrono::{DateTime, Utc};

/// Numeric status ids shared with the recovery status tables.
pub const STATUS_ID_PENDING: i32 = 1;
pub const STATUS_ID_STAGED: i32 = 2;
pub const STATUS_ID_SUCCESS: i32 = 3;
pub const STATUS_ID_FAILED: i32 = 4;

/// Per-file restore state.
///
/// Terminal variants carry their completion time as a required field, so a
/// completion time on a pending file is unrepresentable. (STAGED exists only
/// on the ingest/reporting side and is never produced here.)
#[derive(Debug, Clone, PartialEq)]
pub enum FileState {
    Pending,
    Success {
        completion_time: DateTime<Utc>,
    },
    Failed {
        error_message: String,
        completion_time: DateTime<Utc>,
    },
}

/// One file being restored within a granule.
#[derive(Debug, Clone)]
pub struct FileRecovery {
    pub filename: String,
    pub key_path: String,
    pub restore_destination: String,
    pub multipart_chunksize_mb: Option<i64>,
    pub request_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub state: FileState,
}

impl FileRecovery {
    pub fn new(
        key_path: String,
        restore_destination: String,
        multipart_chunksize_mb: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        let filename = key_path
            .rsplit('/')
            .next()
            .unwrap_or(key_path.as_str())
            .to_string();
        FileRecovery {
            filename,
            key_path,
            restore_destination,
            multipart_chunksize_mb,
            request_time: now,
            last_update: now,
            state: FileState::Pending,
        }
    }

    /// True once the file has reached a terminal state.
    pub fn is_resolved(&self) -> bool {
        !matches!(self.state, FileState::Pending)
    }

    pub fn mark_success(&mut self, now: DateTime<Utc>) {
        self.last_update = now;
        self.state = FileState::Success {
            completion_time: now,
        };
    }

    pub fn mark_failed(&mut self, error_message: String, now: DateTime<Utc>) {
        self.last_update = now;
        self.state = FileState::Failed {
            error_message,
            completion_time: now,
        };
    }

    /// Records a retryable error without resolving the file.
    pub fn record_attempt_error(&mut self, now: DateTime<Utc>) {
        self.last_update = now;
    }

    pub fn status_id(&self) -> i32 {
        match self.state {
            FileState::Pending => STATUS_ID_PENDING,
            FileState::Success { .. } => STATUS_ID_SUCCESS,
            FileState::Failed { .. } => STATUS_ID_FAILED,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            FileState::Failed { error_message, .. } => Some(error_message),
            _ => None,
        }
    }

    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        match self.state {
            FileState::Success { completion_time } | FileState::Failed { completion_time, .. } => {
                Some(completion_time)
            }
            FileState::Pending => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(now: DateTime<Utc>) -> FileRecovery {
        FileRecovery::new(
            "MOD09GQ/006/granule1/file1.hdf".to_string(),
            "dest-bucket".to_string(),
            None,
            now,
        )
    }

    #[test]
    fn test_status_ids_match_recovery_table_values() {
        assert_eq!(STATUS_ID_PENDING, 1);
        assert_eq!(STATUS_ID_STAGED, 2);
        assert_eq!(STATUS_ID_SUCCESS, 3);
        assert_eq!(STATUS_ID_FAILED, 4);
    }

    #[test]
    fn test_new_file_is_pending_without_completion_time() {
        let now = Utc::now();
        let file = sample_file(now);
        assert_eq!(file.filename, "file1.hdf");
        assert_eq!(file.status_id(), STATUS_ID_PENDING);
        assert!(!file.is_resolved());
        assert!(file.completion_time().is_none());
        assert!(file.error_message().is_none());
    }

    #[test]
    fn test_terminal_states_carry_completion_time() {
        let now = Utc::now();
        let mut file = sample_file(now);
        file.mark_success(now);
        assert_eq!(file.status_id(), STATUS_ID_SUCCESS);
        assert_eq!(file.completion_time(), Some(now));

        let mut file = sample_file(now);
        file.mark_failed("boom".to_string(), now);
        assert_eq!(file.status_id(), STATUS_ID_FAILED);
        assert_eq!(file.error_message(), Some("boom"));
        assert_eq!(file.completion_time(), Some(now));
        assert!(file.is_resolved());
    }
}
