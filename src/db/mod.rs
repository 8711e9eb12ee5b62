// archivetool/src/db/mod.rs
use anyhow::{Context, Result};
use regex::Regex;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::sync::OnceLock;

use crate::config::DbConfig;

/// Schema DDL (embedded).
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Connects a pool to the application database.
pub async fn connect(db_config: &DbConfig) -> Result<Pool<Postgres>> {
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect(&db_config.database_url)
        .await
        .context("Failed to connect to the application database")?;
    Ok(pool)
}

/// Applies the embedded schema, statement by statement.
pub async fn apply_schema(pool: &Pool<Postgres>) -> Result<()> {
    for statement in schema_statements(SCHEMA_SQL) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to apply schema statement: {}", statement))?;
    }
    println!("✓ Schema applied.");
    Ok(())
}

fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_]+$").expect("identifier regex is valid"))
}

fn bucket_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9.\-]{3,63}$").expect("bucket regex is valid"))
}

/// Rejects anything outside the strict allow-list before a name is ever
/// interpolated into SQL text. Data values always go through bound
/// parameters; this guards the identifiers that cannot.
pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_regex().is_match(name) {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "'{}' is not a valid SQL identifier (lowercase alphanumeric/underscore only)",
            name
        ))
    }
}

/// Derives the observed-state partition name for one archive bucket.
pub fn partition_name_for_bucket(bucket: &str) -> Result<String> {
    if !bucket_name_regex().is_match(bucket) {
        return Err(anyhow::anyhow!(
            "'{}' is not a valid S3 bucket name",
            bucket
        ));
    }
    let sanitized = bucket.replace(['-', '.'], "_");
    let partition = format!("reconcile_s3_object_{}", sanitized);
    validate_identifier(&partition)?;
    Ok(partition)
}

/// Creates the per-bucket partition of the observed-state table when it does
/// not exist yet. The partition bound must be a literal, so the bucket name
/// is validated and single-quote escaped before interpolation.
pub async fn ensure_partition(pool: &Pool<Postgres>, bucket: &str) -> Result<()> {
    let partition = partition_name_for_bucket(bucket)?;
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} PARTITION OF reconcile_s3_object FOR VALUES IN ('{}')",
        partition,
        bucket.replace('\'', "''")
    );
    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to create partition {} for bucket {}", partition, bucket))?;
    Ok(())
}
