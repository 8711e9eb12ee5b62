// archivetool/src/recovery/mod.rs
pub(crate) mod logic; // Orchestrates granule processing and the output contract
pub(crate) mod retry; // Granule-level shared-counter attempt loop
pub(crate) mod state; // Per-file restore state record
pub(crate) mod status; // Status queue message bodies and bounded-retry enqueue

pub use logic::{RecoveryEvent, RecoveryOutput};

use crate::config::RecoveryConfig;
use crate::errors::Result;
use crate::store::{S3Gateway, SqsStatusQueue};

/// Public entry point for the restore-request process.
///
/// Builds the real S3 and SQS gateways from the environment and drives the
/// orchestrator over the supplied event document.
pub async fn run_recovery_flow(event: RecoveryEvent) -> Result<RecoveryOutput> {
    let config = RecoveryConfig::from_env()?;
    let store = S3Gateway::from_env(None).await;
    let queue = SqsStatusQueue::from_env(config.status_update_queue_url.clone()).await;

    logic::process_event(event, &config, &store, &queue).await
}
