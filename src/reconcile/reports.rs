// archivetool/src/reconcile/reports.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};

use crate::reconcile::jobs::{self, JobRecord};

/// Fixed page size; queries probe one extra row to detect a following page.
pub const PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    #[default]
    Next,
    Previous,
}

/// Exclusive keyset cursor: the sort key of the last row the caller has
/// already seen. Orphan rows carry no catalog identity, so only the key
/// path is required; the phantom and mismatch readers demand the full
/// triple.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub granule_id: Option<String>,
    pub key_path: String,
}

impl PageCursor {
    fn catalog_triple(&self) -> Result<(&str, &str, &str)> {
        match (self.collection_id.as_deref(), self.granule_id.as_deref()) {
            (Some(collection_id), Some(granule_id)) => {
                Ok((collection_id, granule_id, &self.key_path))
            }
            _ => anyhow::bail!(
                "This report's cursor requires collectionId and granuleId alongside keyPath"
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub job_id: i64,
    #[serde(default)]
    pub cursor: Option<PageCursor>,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub job_id: i64,
    pub entries: Vec<T>,
    pub another_page: bool,
}

/// Error envelope for the read-query boundary: an HTTP-style status embedded
/// in an otherwise-200 response. The write/restore path never uses this.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error_type: String,
    pub http_status: u16,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn not_found(message: impl Into<String>) -> Self {
        ErrorEnvelope {
            error_type: "NotFound".to_string(),
            http_status: 404,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ErrorEnvelope {
            error_type: "InternalServerError".to_string(),
            http_status: 500,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PhantomEntry {
    pub collection_id: String,
    pub granule_id: String,
    pub filename: String,
    pub key_path: String,
    pub orca_etag: String,
    pub orca_last_update: DateTime<Utc>,
    pub orca_size: i64,
    pub orca_storage_class: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MismatchEntry {
    pub collection_id: String,
    pub granule_id: String,
    pub filename: String,
    pub key_path: String,
    pub cumulus_archive_location: String,
    pub orca_etag: String,
    pub s3_etag: String,
    pub orca_last_update: DateTime<Utc>,
    pub s3_last_update: DateTime<Utc>,
    pub orca_size_in_bytes: i64,
    pub s3_size_in_bytes: i64,
    pub orca_storage_class: String,
    pub s3_storage_class: String,
    pub discrepancy_type: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrphanEntry {
    pub key_path: String,
    pub etag: String,
    pub last_update: DateTime<Utc>,
    pub size_in_bytes: i64,
    pub storage_class: String,
}

pub async fn get_phantom_page(
    pool: &Pool<Postgres>,
    request: &PageRequest,
) -> Result<PageResponse<PhantomEntry>> {
    let sql = build_page_sql(
        "SELECT collection_id, granule_id, filename, key_path, orca_etag, \
         orca_last_update, orca_size, orca_storage_class \
         FROM reconcile_phantom_report WHERE job_id = $1",
        &["collection_id", "granule_id", "key_path"],
        request.cursor.is_some(),
        request.direction,
    );
    let mut query = sqlx::query_as::<_, PhantomEntry>(&sql).bind(request.job_id);
    if let Some(cursor) = &request.cursor {
        let (collection_id, granule_id, key_path) = cursor.catalog_triple()?;
        query = query.bind(collection_id).bind(granule_id).bind(key_path);
    }
    let rows = query
        .bind(PAGE_SIZE + 1)
        .fetch_all(pool)
        .await
        .inspect_err(|e| eprintln!("❌ Phantom page query failed for job {}: {}", request.job_id, e))
        .with_context(|| format!("Failed to read phantom report page for job {}", request.job_id))?;
    let (entries, another_page) = finalize_page(rows, request.direction, PAGE_SIZE as usize);
    Ok(PageResponse {
        job_id: request.job_id,
        entries,
        another_page,
    })
}

pub async fn get_mismatch_page(
    pool: &Pool<Postgres>,
    request: &PageRequest,
) -> Result<PageResponse<MismatchEntry>> {
    let sql = build_page_sql(
        "SELECT collection_id, granule_id, filename, key_path, cumulus_archive_location, \
         orca_etag, s3_etag, orca_last_update, s3_last_update, orca_size_in_bytes, \
         s3_size_in_bytes, orca_storage_class, s3_storage_class, discrepancy_type \
         FROM reconcile_catalog_mismatch_report WHERE job_id = $1",
        &["collection_id", "granule_id", "key_path"],
        request.cursor.is_some(),
        request.direction,
    );
    let mut query = sqlx::query_as::<_, MismatchEntry>(&sql).bind(request.job_id);
    if let Some(cursor) = &request.cursor {
        let (collection_id, granule_id, key_path) = cursor.catalog_triple()?;
        query = query.bind(collection_id).bind(granule_id).bind(key_path);
    }
    let rows = query
        .bind(PAGE_SIZE + 1)
        .fetch_all(pool)
        .await
        .inspect_err(|e| eprintln!("❌ Mismatch page query failed for job {}: {}", request.job_id, e))
        .with_context(|| format!("Failed to read mismatch report page for job {}", request.job_id))?;
    let (entries, another_page) = finalize_page(rows, request.direction, PAGE_SIZE as usize);
    Ok(PageResponse {
        job_id: request.job_id,
        entries,
        another_page,
    })
}

/// Orphans carry no catalog identity, so their keyset is the key path alone.
pub async fn get_orphan_page(
    pool: &Pool<Postgres>,
    request: &PageRequest,
) -> Result<PageResponse<OrphanEntry>> {
    let sql = build_page_sql(
        "SELECT key_path, etag, last_update, size_in_bytes, storage_class \
         FROM reconcile_orphan_report WHERE job_id = $1",
        &["key_path"],
        request.cursor.is_some(),
        request.direction,
    );
    let mut query = sqlx::query_as::<_, OrphanEntry>(&sql).bind(request.job_id);
    if let Some(cursor) = &request.cursor {
        query = query.bind(&cursor.key_path);
    }
    let rows = query
        .bind(PAGE_SIZE + 1)
        .fetch_all(pool)
        .await
        .inspect_err(|e| eprintln!("❌ Orphan page query failed for job {}: {}", request.job_id, e))
        .with_context(|| format!("Failed to read orphan report page for job {}", request.job_id))?;
    let (entries, another_page) = finalize_page(rows, request.direction, PAGE_SIZE as usize);
    Ok(PageResponse {
        job_id: request.job_id,
        entries,
        another_page,
    })
}

/// Job summary, through the same read-boundary convention as the pages.
pub async fn get_job_summary(
    pool: &Pool<Postgres>,
    job_id: i64,
) -> std::result::Result<JobRecord, ErrorEnvelope> {
    match jobs::get_job(pool, job_id).await {
        Ok(Some(job)) => Ok(job),
        Ok(None) => Err(ErrorEnvelope::not_found(format!(
            "Reconciliation job {} does not exist",
            job_id
        ))),
        Err(e) => Err(ErrorEnvelope::internal(format!("{:#}", e))),
    }
}

/// Builds a keyset page query.
///
/// "Previous" pages reverse both the comparison and the sort order so the
/// same index serves both directions; `finalize_page` restores canonical
/// ascending order afterwards.
fn build_page_sql(
    base_select: &str,
    order_columns: &[&str],
    has_cursor: bool,
    direction: Direction,
) -> String {
    let (comparison, sort) = match direction {
        Direction::Next => (">", "ASC"),
        Direction::Previous => ("<", "DESC"),
    };
    let mut sql = String::from(base_select);
    let mut next_param = 2;
    if has_cursor {
        let placeholders: Vec<String> = (0..order_columns.len())
            .map(|i| format!("${}", next_param + i))
            .collect();
        sql.push_str(&format!(
            " AND ({}) {} ({})",
            order_columns.join(", "),
            comparison,
            placeholders.join(", ")
        ));
        next_param += order_columns.len();
    }
    let order: Vec<String> = order_columns
        .iter()
        .map(|c| format!("{} {}", c, sort))
        .collect();
    sql.push_str(&format!(" ORDER BY {} LIMIT ${}", order.join(", "), next_param));
    sql
}

/// Trims the probe row and restores canonical order.
///
/// Previous-direction rows arrive reversed from the database; after the trim
/// they are re-reversed so every page reads ascending.
fn finalize_page<T>(mut rows: Vec<T>, direction: Direction, limit: usize) -> (Vec<T>, bool) {
    let another_page = rows.len() > limit;
    rows.truncate(limit);
    if direction == Direction::Previous {
        rows.reverse();
    }
    (rows, another_page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_page_sql_next_with_cursor() {
        let sql = build_page_sql(
            "SELECT a, b, c FROM t WHERE job_id = $1",
            &["collection_id", "granule_id", "key_path"],
            true,
            Direction::Next,
        );
        assert!(sql.contains("AND (collection_id, granule_id, key_path) > ($2, $3, $4)"));
        assert!(sql.contains("ORDER BY collection_id ASC, granule_id ASC, key_path ASC LIMIT $5"));
    }

    #[test]
    fn test_build_page_sql_previous_reverses_comparison_and_order() {
        let sql = build_page_sql(
            "SELECT a FROM t WHERE job_id = $1",
            &["key_path"],
            true,
            Direction::Previous,
        );
        assert!(sql.contains("AND (key_path) < ($2)"));
        assert!(sql.contains("ORDER BY key_path DESC LIMIT $3"));
    }

    #[test]
    fn test_build_page_sql_without_cursor_skips_predicate() {
        let sql = build_page_sql(
            "SELECT a FROM t WHERE job_id = $1",
            &["key_path"],
            false,
            Direction::Next,
        );
        assert!(!sql.contains("AND ("));
        assert!(sql.contains("ORDER BY key_path ASC LIMIT $2"));
    }

    #[test]
    fn test_finalize_page_trims_probe_row_and_flags_another_page() {
        let rows = vec![1, 2, 3, 4];
        let (page, another) = finalize_page(rows, Direction::Next, 3);
        assert_eq!(page, vec![1, 2, 3]);
        assert!(another);

        let (page, another) = finalize_page(vec![1, 2], Direction::Next, 3);
        assert_eq!(page, vec![1, 2]);
        assert!(!another);
    }

    #[test]
    fn test_orphan_cursor_needs_only_key_path() -> Result<()> {
        let request: PageRequest = serde_json::from_str(
            r#"{"jobId": 7, "cursor": {"keyPath": "MOD09GQ/006/file1.hdf"}}"#,
        )?;
        let cursor = request.cursor.unwrap();
        assert_eq!(cursor.key_path, "MOD09GQ/006/file1.hdf");
        assert!(cursor.collection_id.is_none());
        assert!(cursor.granule_id.is_none());
        // That same cursor is not enough for the catalog-keyed reports.
        assert!(cursor.catalog_triple().is_err());
        Ok(())
    }

    #[test]
    fn test_full_cursor_yields_catalog_triple() -> Result<()> {
        let request: PageRequest = serde_json::from_str(
            r#"{"jobId": 7, "cursor": {"collectionId": "MOD09GQ___006", "granuleId": "g1", "keyPath": "k1"}}"#,
        )?;
        let cursor = request.cursor.unwrap();
        let (collection_id, granule_id, key_path) = cursor.catalog_triple()?;
        assert_eq!(collection_id, "MOD09GQ___006");
        assert_eq!(granule_id, "g1");
        assert_eq!(key_path, "k1");
        Ok(())
    }

    #[test]
    fn test_previous_pages_return_in_canonical_ascending_order() {
        // The database returns previous pages in descending order; the page
        // the caller sees must ascend exactly like a next page would.
        let descending = vec![30, 20, 10, 5];
        let (page, another) = finalize_page(descending, Direction::Previous, 3);
        assert_eq!(page, vec![10, 20, 30]);
        assert!(another);
    }
}
