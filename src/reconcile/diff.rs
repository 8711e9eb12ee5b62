// archivetool/src/reconcile/diff.rs
use anyhow::{Context, Result};
use sqlx::{Pool, Postgres};

use crate::reconcile::jobs::{self, JobStatus};

// The three categories are disjoint by construction: a catalog entry with no
// observed row is a phantom, an observed row with no catalog entry is an
// orphan, and only rows present on both sides can mismatch. Delete-marker
// rows count as "not present" on the observed side.

const PHANTOM_SQL: &str = "\
INSERT INTO reconcile_phantom_report \
  (job_id, collection_id, granule_id, filename, key_path, orca_etag, \
   orca_last_update, orca_size, orca_storage_class) \
SELECT $1, g.collection_id, g.granule_id, f.filename, f.key_path, f.etag, \
       f.last_update, f.size_in_bytes, f.storage_class \
FROM files f \
JOIN granules g ON f.granule_id = g.id \
LEFT JOIN reconcile_s3_object s \
  ON s.job_id = $1 AND s.orca_archive_location = $2 \
 AND s.key_path = f.key_path AND s.delete_marker = false \
WHERE f.orca_archive_location = $2 AND s.key_path IS NULL";

const ORPHAN_SQL: &str = "\
INSERT INTO reconcile_orphan_report \
  (job_id, key_path, etag, last_update, size_in_bytes, storage_class) \
SELECT s.job_id, s.key_path, s.etag, s.last_update, s.size_in_bytes, s.storage_class \
FROM reconcile_s3_object s \
LEFT JOIN files f \
  ON f.orca_archive_location = $2 AND f.key_path = s.key_path \
WHERE s.job_id = $1 AND s.orca_archive_location = $2 \
  AND s.delete_marker = false AND f.key_path IS NULL";

const MISMATCH_SQL: &str = "\
INSERT INTO reconcile_catalog_mismatch_report \
  (job_id, collection_id, granule_id, filename, key_path, cumulus_archive_location, \
   orca_etag, s3_etag, orca_last_update, s3_last_update, orca_size_in_bytes, \
   s3_size_in_bytes, orca_storage_class, s3_storage_class, discrepancy_type) \
SELECT $1, g.collection_id, g.granule_id, f.filename, f.key_path, \
       f.cumulus_archive_location, f.etag, s.etag, f.last_update, s.last_update, \
       f.size_in_bytes, s.size_in_bytes, f.storage_class, s.storage_class, \
       concat_ws(', ', \
         CASE WHEN f.etag != s.etag THEN 'etag' END, \
         CASE WHEN f.size_in_bytes != s.size_in_bytes THEN 'size_in_bytes' END, \
         CASE WHEN f.last_update != s.last_update THEN 'last_update' END, \
         CASE WHEN f.storage_class != s.storage_class THEN 'storage_class' END) \
FROM files f \
JOIN granules g ON f.granule_id = g.id \
JOIN reconcile_s3_object s \
  ON s.job_id = $1 AND s.orca_archive_location = $2 \
 AND s.key_path = f.key_path AND s.delete_marker = false \
WHERE f.orca_archive_location = $2 \
  AND (f.etag != s.etag OR f.size_in_bytes != s.size_in_bytes \
       OR f.last_update != s.last_update OR f.storage_class != s.storage_class)";

/// Computes the phantom, orphan and mismatch reports for one job, in one
/// transaction. On success the job ends `success`; on failure it ends
/// `error` with the failure text and the error is re-raised.
pub async fn generate_reports(
    pool: &Pool<Postgres>,
    job_id: i64,
    archive_location: &str,
) -> Result<()> {
    jobs::update_job_status(pool, job_id, JobStatus::GeneratingReports).await?;

    match run_diffs(pool, job_id, archive_location).await {
        Ok(()) => {
            jobs::update_job_status(pool, job_id, JobStatus::Success).await?;
            println!(
                "✅ Reconciliation reports generated for job {} ({}).",
                job_id, archive_location
            );
            Ok(())
        }
        Err(e) => {
            jobs::mark_job_error(pool, job_id, &format!("{:#}", e)).await?;
            Err(e)
        }
    }
}

async fn run_diffs(pool: &Pool<Postgres>, job_id: i64, archive_location: &str) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to open transaction")?;

    for (name, sql) in [
        ("phantom", PHANTOM_SQL),
        ("orphan", ORPHAN_SQL),
        ("mismatch", MISMATCH_SQL),
    ] {
        let result = sqlx::query(sql)
            .bind(job_id)
            .bind(archive_location)
            .execute(&mut *tx)
            .await
            .inspect_err(|e| {
                eprintln!(
                    "❌ {} report generation failed for job {} ({}): {}",
                    name, job_id, archive_location, e
                )
            })
            .with_context(|| format!("Failed to generate {} report for job {}", name, job_id))?;
        println!(
            "✓ {} report for job {}: {} row(s).",
            name,
            job_id,
            result.rows_affected()
        );
    }

    tx.commit().await.context("Failed to commit report generation")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_diff_is_scoped_to_job_and_bucket() {
        for sql in [PHANTOM_SQL, ORPHAN_SQL, MISMATCH_SQL] {
            assert!(sql.contains("$1"), "job scope missing: {}", sql);
            assert!(sql.contains("orca_archive_location = $2"), "bucket scope missing: {}", sql);
            assert!(sql.contains("delete_marker = false"), "delete markers not excluded: {}", sql);
        }
    }

    #[test]
    fn test_phantom_and_orphan_are_anti_joins() {
        assert!(PHANTOM_SQL.contains("s.key_path IS NULL"));
        assert!(ORPHAN_SQL.contains("f.key_path IS NULL"));
    }

    #[test]
    fn test_mismatch_classifies_each_differing_attribute() {
        for attribute in ["'etag'", "'size_in_bytes'", "'last_update'", "'storage_class'"] {
            assert!(MISMATCH_SQL.contains(attribute));
        }
        assert!(MISMATCH_SQL.contains("discrepancy_type"));
    }
}
