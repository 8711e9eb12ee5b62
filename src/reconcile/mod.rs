// archivetool/src/reconcile/mod.rs
pub(crate) mod diff; // Phantom / orphan / mismatch report generation
pub(crate) mod inventory; // S3 inventory manifest ingestion
pub(crate) mod jobs; // Reconciliation job lifecycle
pub(crate) mod reports; // Keyset-paginated report readers

pub use inventory::InventoryManifest;
pub use reports::PageRequest;

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::{Pool, Postgres};

use crate::config::{DbConfig, ReconcileConfig};
use crate::store::S3Gateway;
use crate::store::s3::parse_s3_uri;

/// Input contract for one reconciliation run: where the inventory manifest
/// lives. The inventory CSVs sit alongside the manifest in the same report
/// bucket; the archive bucket being reconciled comes from the manifest.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileEvent {
    /// `s3://bucket/key` URI of the inventory manifest to ingest.
    pub manifest_location: String,
    #[serde(default)]
    pub report_bucket_region: Option<String>,
}

/// Which report a read request targets.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportKind {
    Phantoms,
    Orphans,
    Mismatches,
    Job,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub report: ReportKind,
    #[serde(flatten)]
    pub page: PageRequest,
}

/// Public entry point for a reconciliation run: ingest the inventory named
/// by the event, then diff it against the catalog. Returns the job id.
pub async fn run_reconcile_flow(event: ReconcileEvent) -> Result<i64> {
    let (report_bucket, manifest_key) = parse_s3_uri(&event.manifest_location)?;
    let reconcile_config = ReconcileConfig::from_env()?;
    let db_config = DbConfig::from_env()?;
    let pool = crate::db::connect(&db_config).await?;
    let store = S3Gateway::from_env(
        event
            .report_bucket_region
            .clone()
            .or_else(|| Some(reconcile_config.aws_region.clone())),
    )
    .await;

    let manifest_body = store.get_object_string(&report_bucket, &manifest_key).await?;
    let manifest: InventoryManifest = serde_json::from_str(&manifest_body)
        .with_context(|| format!("Failed to parse inventory manifest {}", manifest_key))?;

    let job_id = jobs::create_job(
        &pool,
        &manifest.source_bucket,
        manifest.inventory_creation_time(),
    )
    .await?;

    inventory::load_inventory(
        &pool,
        &store,
        &reconcile_config,
        &report_bucket,
        &manifest,
        job_id,
    )
    .await?;

    diff::generate_reports(&pool, job_id, &manifest.source_bucket).await?;
    Ok(job_id)
}

/// Public entry point for report reads. Failures surface as a structured
/// error envelope in the returned JSON, not as a raised error.
pub async fn run_report_flow(request: ReportRequest) -> Result<serde_json::Value> {
    let db_config = DbConfig::from_env()?;
    let pool = crate::db::connect(&db_config).await?;
    Ok(read_report(&pool, request).await)
}

async fn read_report(pool: &Pool<Postgres>, request: ReportRequest) -> serde_json::Value {
    let result = match request.report {
        ReportKind::Phantoms => reports::get_phantom_page(pool, &request.page)
            .await
            .and_then(|page| serde_json::to_value(page).map_err(Into::into)),
        ReportKind::Orphans => reports::get_orphan_page(pool, &request.page)
            .await
            .and_then(|page| serde_json::to_value(page).map_err(Into::into)),
        ReportKind::Mismatches => reports::get_mismatch_page(pool, &request.page)
            .await
            .and_then(|page| serde_json::to_value(page).map_err(Into::into)),
        ReportKind::Job => {
            return match reports::get_job_summary(pool, request.page.job_id).await {
                Ok(job) => serde_json::json!({
                    "jobId": job.id,
                    "orcaArchiveLocation": job.orca_archive_location,
                    "status": job.status,
                    "inventoryCreationTime": job.inventory_creation_time,
                    "startTime": job.start_time,
                    "lastUpdate": job.last_update,
                    "endTime": job.end_time,
                    "errorMessage": job.error_message,
                }),
                Err(envelope) => serde_json::to_value(envelope).unwrap_or_default(),
            };
        }
    };
    match result {
        Ok(value) => value,
        Err(e) => serde_json::to_value(reports::ErrorEnvelope::internal(format!("{:#}", e)))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_event_names_manifest_by_uri() -> anyhow::Result<()> {
        let event: ReconcileEvent = serde_json::from_str(
            r#"{"manifestLocation": "s3://report-bucket/inventory/2026/manifest.json"}"#,
        )?;
        let (bucket, key) = parse_s3_uri(&event.manifest_location)?;
        assert_eq!(bucket, "report-bucket");
        assert_eq!(key, "inventory/2026/manifest.json");
        assert!(event.report_bucket_region.is_none());
        Ok(())
    }

    #[test]
    fn test_reconcile_event_rejects_non_s3_manifest_location() -> anyhow::Result<()> {
        let event: ReconcileEvent = serde_json::from_str(
            r#"{"manifestLocation": "https://report-bucket/manifest.json"}"#,
        )?;
        assert!(parse_s3_uri(&event.manifest_location).is_err());
        Ok(())
    }
}
