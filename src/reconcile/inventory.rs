// archivetool/src/reconcile/inventory.rs
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use sqlx::{Pool, Postgres};

use crate::config::ReconcileConfig;
use crate::db::{ensure_partition, partition_name_for_bucket, validate_identifier};
use crate::reconcile::jobs::{self, JobStatus};
use crate::store::ArchiveStore;

/// Staging table the bulk importer loads each inventory CSV into.
const STAGING_TABLE: &str = "s3_import";

const COMPRESSED_CSV_SUFFIX: &str = ".csv.gz";

/// An S3 inventory manifest document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryManifest {
    /// The archive bucket the inventory describes.
    pub source_bucket: String,
    pub file_format: String,
    /// Comma-separated column names, in CSV column order.
    pub file_schema: String,
    #[serde(default)]
    pub creation_timestamp: Option<String>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub key: String,
}

impl InventoryManifest {
    /// Inventory creation time, given as epoch milliseconds in the manifest.
    pub fn inventory_creation_time(&self) -> Option<DateTime<Utc>> {
        self.creation_timestamp
            .as_deref()
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }
}

/// Ingests one inventory manifest into the partitioned observed-state table.
///
/// On success the job is marked STAGED; on any failure the job is marked
/// ERROR with the failure text and the error re-raised. The transaction
/// rollback guarantees no partial partition content survives a failure.
pub async fn load_inventory<S: ArchiveStore>(
    pool: &Pool<Postgres>,
    store: &S,
    config: &ReconcileConfig,
    report_bucket: &str,
    manifest: &InventoryManifest,
    job_id: i64,
) -> Result<()> {
    match ingest(pool, store, config, report_bucket, manifest, job_id).await {
        Ok(()) => {
            jobs::update_job_status(pool, job_id, JobStatus::Staged).await?;
            println!(
                "✅ Inventory for {} staged under job {}.",
                manifest.source_bucket, job_id
            );
            Ok(())
        }
        Err(e) => {
            jobs::mark_job_error(pool, job_id, &format!("{:#}", e)).await?;
            Err(e)
        }
    }
}

async fn ingest<S: ArchiveStore>(
    pool: &Pool<Postgres>,
    store: &S,
    config: &ReconcileConfig,
    report_bucket: &str,
    manifest: &InventoryManifest,
    job_id: i64,
) -> Result<()> {
    if !manifest.file_format.eq_ignore_ascii_case("CSV") {
        anyhow::bail!(
            "Unsupported inventory file format '{}'; only CSV is supported",
            manifest.file_format
        );
    }
    for file in &manifest.files {
        if !file.key.ends_with(COMPRESSED_CSV_SUFFIX) {
            anyhow::bail!(
                "Inventory file key '{}' does not end with '{}'",
                file.key,
                COMPRESSED_CSV_SUFFIX
            );
        }
    }

    let schema_columns = parse_schema_columns(&manifest.file_schema);
    let column_list = generate_temporary_s3_column_list(&schema_columns)?;
    let projection_sql = build_projection_sql(&schema_columns)?;

    // The inventory feature does not reliably set Content-Encoding on its
    // gzip output, and the bulk importer refuses undeclared gzip. Patch the
    // metadata before any import runs.
    for file in &manifest.files {
        store
            .ensure_gzip_metadata(report_bucket, &file.key)
            .await
            .with_context(|| format!("Pre-flight metadata patch failed for {}", file.key))?;
    }

    let partition = partition_name_for_bucket(&manifest.source_bucket)?;
    ensure_partition(pool, &manifest.source_bucket).await?;

    let mut tx = pool.begin().await.context("Failed to open transaction")?;

    // Fast per-bucket reset; this is why the table is partitioned.
    sqlx::query(&format!("TRUNCATE TABLE {}", partition))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to truncate partition {}", partition))?;

    sqlx::query(&format!(
        "CREATE TEMPORARY TABLE {} ({}) ON COMMIT DROP",
        STAGING_TABLE, column_list
    ))
    .execute(&mut *tx)
    .await
    .context("Failed to create inventory staging table")?;

    for file in &manifest.files {
        println!(
            "🔍 Importing inventory file s3://{}/{} for job {}",
            report_bucket, file.key, job_id
        );
        sqlx::query(
            "SELECT aws_s3.table_import_from_s3($1, '', '(format csv)', $2, $3, $4, $5, $6, '')",
        )
        .bind(STAGING_TABLE)
        .bind(report_bucket)
        .bind(&file.key)
        .bind(&config.aws_region)
        .bind(&config.s3_access_key_id)
        .bind(&config.s3_secret_access_key)
        .execute(&mut *tx)
        .await
        .inspect_err(|e| {
            eprintln!(
                "❌ Bulk import of s3://{}/{} failed for job {}: {}",
                report_bucket, file.key, job_id, e
            )
        })
        .with_context(|| format!("Bulk import of {} failed", file.key))?;
    }

    sqlx::query(&projection_sql)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .inspect_err(|e| {
            eprintln!(
                "❌ Projection into {} failed for job {}: {}",
                partition, job_id, e
            )
        })
        .context("Failed to project staging rows into reconcile_s3_object")?;

    tx.commit().await.context("Failed to commit inventory ingestion")?;
    Ok(())
}

fn parse_schema_columns(file_schema: &str) -> Vec<String> {
    file_schema
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Maps the manifest's declared column order onto typed staging columns.
///
/// Known inventory columns get fixed names and types; anything unrecognized
/// at position `i` becomes `junk{i} text` so schema drift in the inventory
/// format never breaks the bulk load.
pub fn generate_temporary_s3_column_list(schema_columns: &[String]) -> Result<String> {
    let mut columns = Vec::with_capacity(schema_columns.len());
    for (i, name) in schema_columns.iter().enumerate() {
        let column = match name.as_str() {
            "Bucket" => "orca_archive_location text".to_string(),
            "Key" => "key_path text".to_string(),
            "Size" => "size_in_bytes bigint".to_string(),
            "LastModifiedDate" => "last_update timestamptz".to_string(),
            "ETag" => "etag text".to_string(),
            "StorageClass" => "storage_class text".to_string(),
            "IsDeleteMarker" => "delete_marker bool".to_string(),
            "IsLatest" => "is_latest bool".to_string(),
            _ => format!("junk{} text", i),
        };
        let column_name = column.split(' ').next().unwrap_or_default();
        validate_identifier(column_name)?;
        columns.push(column);
    }
    if columns.is_empty() {
        anyhow::bail!("Inventory manifest declared an empty fileSchema");
    }
    Ok(columns.join(", "))
}

/// Builds the staging-to-permanent projection.
///
/// `IsDeleteMarker` and `IsLatest` only appear in inventories of versioned
/// buckets; absent columns project as constants.
fn build_projection_sql(schema_columns: &[String]) -> Result<String> {
    for required in ["Bucket", "Key", "Size", "LastModifiedDate", "ETag", "StorageClass"] {
        if !schema_columns.iter().any(|c| c == required) {
            anyhow::bail!("Inventory fileSchema is missing required column '{}'", required);
        }
    }
    let delete_marker = if schema_columns.iter().any(|c| c == "IsDeleteMarker") {
        "delete_marker"
    } else {
        "false"
    };
    let latest_filter = if schema_columns.iter().any(|c| c == "IsLatest") {
        " WHERE is_latest = true"
    } else {
        ""
    };
    Ok(format!(
        "INSERT INTO reconcile_s3_object \
         (job_id, orca_archive_location, key_path, etag, last_update, size_in_bytes, \
          storage_class, delete_marker) \
         SELECT $1, orca_archive_location, key_path, etag, last_update, size_in_bytes, \
          storage_class, {} FROM {}{}",
        delete_marker, STAGING_TABLE, latest_filter
    ))
}
