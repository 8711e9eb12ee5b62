// archivetool/src/store/s3.rs
use anyhow::{Context, Result};
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::types::{GlacierJobParameters, MetadataDirective, RestoreRequest, Tier};

use crate::store::{ArchiveStore, FileMetadata, HeadOutcome, RestoreOutcome};

/// Object store gateway backed by the AWS S3 SDK.
pub struct S3Gateway {
    client: s3::Client,
}

impl S3Gateway {
    /// Builds a gateway from the ambient AWS credential chain.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let sdk_config = loader.load().await;
        S3Gateway {
            client: s3::Client::new(&sdk_config),
        }
    }

    /// Downloads a small text object (e.g. an inventory manifest) in full.
    pub async fn get_object_string(&self, bucket: &str, key: &str) -> Result<String> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to get object s3://{}/{}", bucket, key))?;
        let bytes = object
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", bucket, key))?
            .into_bytes();
        String::from_utf8(bytes.to_vec())
            .with_context(|| format!("s3://{}/{} is not valid UTF-8", bucket, key))
    }
}

impl ArchiveStore for S3Gateway {
    async fn head(&self, bucket: &str, key: &str) -> HeadOutcome {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => HeadOutcome::Found(FileMetadata {
                // head_object omits the storage class for STANDARD objects.
                storage_class: output
                    .storage_class()
                    .map(|sc| sc.as_str().to_string())
                    .unwrap_or_else(|| "STANDARD".to_string()),
                etag: output
                    .e_tag()
                    .map(|e| e.trim_matches('"').to_string())
                    .unwrap_or_default(),
                size_in_bytes: output.content_length().unwrap_or(0),
                version: output.version_id().map(|v| v.to_string()),
            }),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()) == Some(true) {
                    HeadOutcome::Missing
                } else {
                    HeadOutcome::Error(format!(
                        "Failed to head s3://{}/{}: {}",
                        bucket, key, e
                    ))
                }
            }
        }
    }

    async fn initiate_restore(
        &self,
        bucket: &str,
        key: &str,
        restore_expire_days: i32,
        recovery_type: &str,
    ) -> RestoreOutcome {
        let glacier_params = match GlacierJobParameters::builder()
            .tier(Tier::from(recovery_type))
            .build()
        {
            Ok(params) => params,
            Err(e) => {
                return RestoreOutcome::Terminal(format!(
                    "Invalid retrieval tier '{}': {}",
                    recovery_type, e
                ));
            }
        };
        let restore_request = RestoreRequest::builder()
            .days(restore_expire_days)
            .glacier_job_parameters(glacier_params)
            .build();

        match self
            .client
            .restore_object()
            .bucket(bucket)
            .key(key)
            .restore_request(restore_request)
            .send()
            .await
        {
            Ok(_) => RestoreOutcome::Accepted,
            Err(e) => {
                // The SDK models the "object is already readable" condition
                // (an HTTP 200 on the wire) as a typed error. The file stays
                // pending and gets re-attempted like any other client error.
                if e.as_service_error()
                    .map(|se| se.is_object_already_in_active_tier_error())
                    == Some(true)
                {
                    RestoreOutcome::Retryable(format!(
                        "s3://{}/{} is already restored to an active tier",
                        bucket, key
                    ))
                } else {
                    RestoreOutcome::Retryable(format!(
                        "Failed to initiate restore of s3://{}/{}: {}",
                        bucket, key, e
                    ))
                }
            }
        }
    }

    async fn ensure_gzip_metadata(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(format!("{}/{}", bucket, key))
            .bucket(bucket)
            .key(key)
            .metadata_directive(MetadataDirective::Replace)
            .content_encoding("gzip")
            .content_type("text/csv")
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to patch Content-Encoding on s3://{}/{}",
                    bucket, key
                )
            })?;
        Ok(())
    }
}

/// Parses an S3 URI (s3://bucket/key) into bucket and key.
pub fn parse_s3_uri(s3_uri: &str) -> Result<(String, String)> {
    let uri = url::Url::parse(s3_uri)
        .with_context(|| format!("Invalid S3 URI format: {}", s3_uri))?;
    if uri.scheme() != "s3" {
        return Err(anyhow::anyhow!("S3 URI must start with s3://"));
    }
    let bucket = uri
        .host_str()
        .context("S3 URI missing bucket name")?
        .to_string();
    let key = uri.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(anyhow::anyhow!("S3 URI missing key (object path)"));
    }
    Ok((bucket, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_uri_valid() -> anyhow::Result<()> {
        let (bucket, key) = parse_s3_uri("s3://my-inventory/prefix/manifest.json")?;
        assert_eq!(bucket, "my-inventory");
        assert_eq!(key, "prefix/manifest.json");
        Ok(())
    }

    #[test]
    fn test_parse_s3_uri_rejects_other_schemes_and_missing_key() {
        assert!(parse_s3_uri("https://my-inventory/manifest.json").is_err());
        assert!(parse_s3_uri("s3://my-inventory").is_err());
        assert!(parse_s3_uri("s3://my-inventory/").is_err());
    }
}
