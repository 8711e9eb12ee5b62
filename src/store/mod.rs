// archivetool/src/store/mod.rs
pub(crate) mod queue; // Status queue client (FIFO enqueue with attributes)
pub(crate) mod s3; // Object store gateway (head, restore-initiate, metadata patch)

pub use queue::SqsStatusQueue;
pub use s3::S3Gateway;

/// Metadata returned by a successful head call against the archive store.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub storage_class: String,
    pub etag: String,
    pub size_in_bytes: i64,
    pub version: Option<String>,
}

/// Outcome of an existence/metadata check.
///
/// `Missing` is terminal for the file being processed: retrying cannot make
/// an absent object appear.
#[derive(Debug, Clone)]
pub enum HeadOutcome {
    Found(FileMetadata),
    Missing,
    Error(String),
}

/// Outcome of a restore-initiate call. The retry loop branches on the tag
/// alone and never inspects error types.
#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    /// The store accepted the restore request.
    Accepted,
    /// A client-side condition (throttling, already-restored object, ...)
    /// that a later attempt may clear.
    Retryable(String),
    /// A condition no retry can fix.
    Terminal(String),
}

/// Message attribute distinguishing the two status-update message shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    NewJob,
    UpdateFile,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::NewJob => "new_job",
            RequestMethod::UpdateFile => "update_file",
        }
    }

    /// Table the downstream consumer writes this message into.
    pub fn table_name(&self) -> &'static str {
        match self {
            RequestMethod::NewJob => "recovery_job",
            RequestMethod::UpdateFile => "recovery_file",
        }
    }
}

/// Capability contract for the archive object store.
pub trait ArchiveStore {
    /// Checks object existence and fetches its metadata in one call.
    async fn head(&self, bucket: &str, key: &str) -> HeadOutcome;

    /// Asks the store to stage a cold-storage object for retrieval.
    async fn initiate_restore(
        &self,
        bucket: &str,
        key: &str,
        restore_expire_days: i32,
        recovery_type: &str,
    ) -> RestoreOutcome;

    /// Patches an inventory CSV object's metadata so its gzip encoding is
    /// declared. The cloud inventory feature does not reliably set
    /// Content-Encoding, and the bulk importer requires it.
    async fn ensure_gzip_metadata(&self, bucket: &str, key: &str) -> anyhow::Result<()>;
}

/// Capability contract for the FIFO status queue.
pub trait StatusQueue {
    /// Enqueues one status message. `Err` carries a transient failure the
    /// caller may retry; returns the queue's message id on success.
    async fn enqueue(
        &self,
        message_body: &str,
        method: RequestMethod,
    ) -> std::result::Result<String, String>;
}
