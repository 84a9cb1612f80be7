//! Presigned URLs for staged images.
//!
//! URLs are computed on every detail render and never cached.

use crate::error::CrowdError;
use crate::gateway::{QueryGateway, Statement};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diagnostics::*;
use serde_json::Value;
use std::sync::Arc;

/// Seven days, the default lifetime of a presigned URL
pub const DEFAULT_PRESIGN_TTL_SECS: u64 = 604_800;

/// Longest lifetime the platform accepts
pub const MAX_PRESIGN_TTL_SECS: u64 = 604_800;

/// Outcome of one resolution; none of these are fatal to the caller
#[derive(Debug)]
pub enum Resolution {
    Resolved {
        url: String,
        expires_at: DateTime<Utc>,
    },
    /// Inputs were missing, no remote call was made
    Skipped(String),
    /// The remote call failed or returned nothing
    Failed(CrowdError),
}

impl Resolution {
    pub fn url(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { url, .. } => Some(url),
            _ => None,
        }
    }
}

pub struct PresignResolver {
    gateway: Arc<dyn QueryGateway>,
    ttl_secs: u64,
}

impl PresignResolver {
    pub fn new(gateway: Arc<dyn QueryGateway>, ttl_secs: u64) -> Self {
        Self { gateway, ttl_secs }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Resolve with the configured lifetime
    pub async fn resolve(&self, stage: Option<&str>, relative_path: Option<&str>) -> Resolution {
        self.resolve_with_ttl(stage, relative_path, self.ttl_secs).await
    }

    pub async fn resolve_with_ttl(
        &self,
        stage: Option<&str>,
        relative_path: Option<&str>,
        ttl_secs: u64,
    ) -> Resolution {
        let stage = stage.map(str::trim).filter(|s| !s.is_empty());
        let relative_path = relative_path.map(str::trim).filter(|p| !p.is_empty());
        let (Some(stage), Some(relative_path)) = (stage, relative_path) else {
            let warning = "Missing STAGE or RELATIVE_PATH in file metadata".to_string();
            warn!("{warning}", warning: warning);
            return Resolution::Skipped(warning);
        };
        let Some(expires_at) = expiry(ttl_secs) else {
            let warning = format!(
                "URL lifetime of {ttl_secs} seconds is outside 1..={MAX_PRESIGN_TTL_SECS}"
            );
            warn!("{warning}", warning: warning);
            return Resolution::Skipped(warning);
        };

        let statement = Statement::new("SELECT GET_PRESIGNED_URL(?, ?, ?) AS URL")
            .bind_text(stage)
            .bind_text(relative_path)
            .bind_fixed(ttl_secs);

        let result = match self.gateway.execute(&statement).await {
            Ok(result) => result,
            Err(e) => {
                let message = e.to_string();
                error!("Error getting presigned URL for {relative_path}: {message}",
                    relative_path: relative_path, message: message);
                return Resolution::Failed(e);
            }
        };

        match result.scalar() {
            Some(Value::String(url)) if !url.is_empty() => {
                debug!("Presigned URL resolved for {relative_path}", relative_path: relative_path);
                Resolution::Resolved {
                    url: url.clone(),
                    expires_at,
                }
            }
            _ => Resolution::Failed(CrowdError::EmptyResult(format!(
                "GET_PRESIGNED_URL for {relative_path}"
            ))),
        }
    }
}

/// End of a URL lifetime starting now, `None` when the lifetime is not accepted
fn expiry(ttl_secs: u64) -> Option<DateTime<Utc>> {
    if ttl_secs == 0 || ttl_secs > MAX_PRESIGN_TTL_SECS {
        return None;
    }
    let ttl = ChronoDuration::try_seconds(i64::try_from(ttl_secs).ok()?)?;
    Utc::now().checked_add_signed(ttl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ResultSet;
    use crate::testing::{ScriptedGateway, single_column};

    const URL: &str = "https://bucket.s3.amazonaws.com/snaps/a.jpg?X-Amz-Signature=abc";

    #[tokio::test]
    async fn test_resolve() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on("GET_PRESIGNED_URL", single_column("URL", &[URL]));
        let resolver = PresignResolver::new(gateway.clone(), DEFAULT_PRESIGN_TTL_SECS);

        let before = Utc::now();
        let resolution = resolver.resolve(Some("@snaps"), Some("a.jpg")).await;
        assert_eq!(resolution.url(), Some(URL));
        if let Resolution::Resolved { expires_at, .. } = resolution {
            assert!(expires_at >= before + ChronoDuration::days(7));
        }

        let statements = gateway.statements();
        assert_eq!(statements.len(), 1);
        let values: Vec<&str> = statements[0].bindings.iter().map(|b| b.value.as_str()).collect();
        assert_eq!(values, vec!["@snaps", "a.jpg", "604800"]);
    }

    #[tokio::test]
    async fn test_empty_inputs_skip_the_remote_call() {
        let gateway = Arc::new(ScriptedGateway::new());
        let resolver = PresignResolver::new(gateway.clone(), DEFAULT_PRESIGN_TTL_SECS);

        for (stage, path) in [
            (None, Some("a.jpg")),
            (Some("@snaps"), None),
            (Some(""), Some("a.jpg")),
            (Some("@snaps"), Some("  ")),
        ] {
            let resolution = resolver.resolve(stage, path).await;
            assert!(matches!(resolution, Resolution::Skipped(_)));
        }
        assert!(gateway.statements().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_is_returned_not_raised() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail("GET_PRESIGNED_URL", "insufficient privileges");
        let resolver = PresignResolver::new(gateway, DEFAULT_PRESIGN_TTL_SECS);

        let resolution = resolver.resolve(Some("@snaps"), Some("a.jpg")).await;
        match resolution {
            Resolution::Failed(e) => assert!(e.to_string().contains("insufficient privileges")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_is_skipped() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on("GET_PRESIGNED_URL", single_column("URL", &[URL]));
        let resolver = PresignResolver::new(gateway.clone(), DEFAULT_PRESIGN_TTL_SECS);

        for ttl in [0, MAX_PRESIGN_TTL_SECS + 1, 100_000_000_000_000_000, u64::MAX] {
            let resolution = resolver
                .resolve_with_ttl(Some("@snaps"), Some("a.jpg"), ttl)
                .await;
            assert!(matches!(resolution, Resolution::Skipped(_)), "ttl {ttl}");
        }
        assert!(gateway.statements().is_empty());

        let resolution = resolver
            .resolve_with_ttl(Some("@snaps"), Some("a.jpg"), MAX_PRESIGN_TTL_SECS)
            .await;
        assert_eq!(resolution.url(), Some(URL));
    }

    #[tokio::test]
    async fn test_no_rows_is_a_failure() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on("GET_PRESIGNED_URL", ResultSet::default());
        let resolver = PresignResolver::new(gateway, 60);

        let resolution = resolver.resolve(Some("@snaps"), Some("a.jpg")).await;
        assert!(matches!(resolution, Resolution::Failed(CrowdError::EmptyResult(_))));
        assert_eq!(resolution.url(), None);
    }
}
