// archivetool/src/config/mod.rs
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Valid Glacier retrieval tiers accepted for a recovery request.
pub const VALID_RECOVERY_TYPES: [&str; 3] = ["Bulk", "Expedited", "Standard"];

const DEFAULT_RESTORE_EXPIRE_DAYS: i32 = 5;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_SLEEP_SECS: u64 = 0;
const DEFAULT_RECOVERY_TYPE: &str = "Standard";
const DEFAULT_AWS_REGION: &str = "us-west-2";

/// Settings driving the restore orchestrator.
///
/// Everything here comes from the environment with hardcoded fallbacks,
/// except the status queue URL which has no sensible default and is
/// therefore required.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub default_archive_bucket: Option<String>,
    pub default_recovery_type: Option<String>,
    pub restore_expire_days: i32,
    pub max_retries: u32,
    pub retry_sleep_secs: u64,
    pub default_multipart_chunksize_mb: Option<i64>,
    pub status_update_queue_url: String,
}

impl RecoveryConfig {
    pub fn from_env() -> Result<Self> {
        let status_update_queue_url = env_string("STATUS_UPDATE_QUEUE_URL")
            .context("STATUS_UPDATE_QUEUE_URL must be set")?;

        Ok(RecoveryConfig {
            default_archive_bucket: env_string("ORCA_DEFAULT_BUCKET").ok(),
            default_recovery_type: env_string("DEFAULT_RECOVERY_TYPE").ok(),
            restore_expire_days: env_parse_or_default(
                "RESTORE_EXPIRE_DAYS",
                DEFAULT_RESTORE_EXPIRE_DAYS,
            ),
            max_retries: env_parse_or_default("DEFAULT_MAX_REQUEST_RETRIES", DEFAULT_MAX_RETRIES),
            retry_sleep_secs: env_parse_or_default(
                "DEFAULT_RESTORE_RETRY_SLEEP_SECS",
                DEFAULT_RETRY_SLEEP_SECS,
            ),
            default_multipart_chunksize_mb: env_string("DEFAULT_MULTIPART_CHUNKSIZE_MB")
                .ok()
                .and_then(|v| v.parse().ok()),
            status_update_queue_url,
        })
    }
}

/// Settings driving inventory ingestion and report generation.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub aws_region: String,
    /// Credentials handed to the database's bulk CSV import extension,
    /// which reads the inventory CSVs from S3 server-side.
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,
}

impl ReconcileConfig {
    pub fn from_env() -> Result<Self> {
        Ok(ReconcileConfig {
            aws_region: env_or_default("AWS_REGION", DEFAULT_AWS_REGION),
            s3_access_key_id: env_string("S3_ACCESS_KEY_ID")
                .context("S3_ACCESS_KEY_ID must be set")?,
            s3_secret_access_key: env_string("S3_SECRET_ACCESS_KEY")
                .context("S3_SECRET_ACCESS_KEY must be set")?,
        })
    }
}

/// Database connection settings. The connection URL is a secret: there is
/// no fallback and a missing value is an immediate error.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Result<Self> {
        Ok(DbConfig {
            database_url: env_string("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env_parse_or_default("DATABASE_MAX_CONNECTIONS", 5),
        })
    }
}

/// Resolves the archive bucket for a recovery request.
///
/// Precedence: explicit config override, then environment default.
pub fn resolve_archive_bucket(
    config_override: Option<&str>,
    env_default: Option<&str>,
) -> Result<String> {
    match config_override.filter(|b| !b.is_empty()) {
        Some(bucket) => Ok(bucket.to_string()),
        None => env_default
            .filter(|b| !b.is_empty())
            .map(|b| b.to_string())
            .context("No archive bucket given: set it in the request config or ORCA_DEFAULT_BUCKET"),
    }
}

/// Resolves the retrieval tier for a recovery request.
///
/// An invalid override falls back to the environment default with a logged
/// warning; if neither source yields a valid tier this is an error.
pub fn resolve_recovery_type(
    config_override: Option<&str>,
    env_default: Option<&str>,
) -> Result<String> {
    if let Some(tier) = config_override {
        if VALID_RECOVERY_TYPES.contains(&tier) {
            return Ok(tier.to_string());
        }
        println!(
            "Warning: recovery type '{}' from request config is not one of {:?}. Falling back to environment default.",
            tier, VALID_RECOVERY_TYPES
        );
    }
    match env_default {
        Some(tier) if VALID_RECOVERY_TYPES.contains(&tier) => Ok(tier.to_string()),
        Some(tier) => anyhow::bail!(
            "Recovery type '{}' from DEFAULT_RECOVERY_TYPE is not one of {:?}",
            tier,
            VALID_RECOVERY_TYPES
        ),
        None => Ok(DEFAULT_RECOVERY_TYPE.to_string()),
    }
}

/// Reads an environment variable, treating empty values as unset.
fn env_string(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("{} must be set", name))?;
    if value.trim().is_empty() {
        anyhow::bail!("{} is set but empty", name);
    }
    Ok(value)
}

fn env_or_default(name: &str, default: &str) -> String {
    match env_string(name) {
        Ok(value) => value,
        Err(_) => {
            println!("Warning: {} not set. Using default '{}'.", name, default);
            default.to_string()
        }
    }
}

fn env_parse_or_default<T: FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match env_string(name).ok().and_then(|v| v.parse().ok()) {
        Some(value) => value,
        None => {
            println!("Warning: {} not set or unparseable. Using default '{}'.", name, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_recovery_type_valid_override() -> anyhow::Result<()> {
        let tier = resolve_recovery_type(Some("Expedited"), Some("Standard"))?;
        assert_eq!(tier, "Expedited");
        Ok(())
    }

    #[test]
    fn test_resolve_recovery_type_invalid_override_falls_back() -> anyhow::Result<()> {
        let tier = resolve_recovery_type(Some("Turbo"), Some("Bulk"))?;
        assert_eq!(tier, "Bulk");
        Ok(())
    }

    #[test]
    fn test_resolve_recovery_type_missing_everywhere_uses_standard() -> anyhow::Result<()> {
        let tier = resolve_recovery_type(None, None)?;
        assert_eq!(tier, "Standard");
        Ok(())
    }

    #[test]
    fn test_resolve_recovery_type_invalid_env_default_errors() {
        let result = resolve_recovery_type(Some("Turbo"), Some("Sloth"));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_archive_bucket_precedence() -> anyhow::Result<()> {
        let bucket = resolve_archive_bucket(Some("override-bucket"), Some("env-bucket"))?;
        assert_eq!(bucket, "override-bucket");

        let bucket = resolve_archive_bucket(None, Some("env-bucket"))?;
        assert_eq!(bucket, "env-bucket");

        assert!(resolve_archive_bucket(None, None).is_err());
        assert!(resolve_archive_bucket(Some(""), None).is_err());
        Ok(())
    }
}
