//! Validation archive cache
//!
//! Archives are downloaded once per instance type and reused. A cached file
//! is trusted as-is; downloads land in a temporary file that is renamed into
//! place, so an interrupted download never leaves a truncated entry.

use crate::error::ControllerError;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    http: reqwest::Client,
}

impl ArtifactCache {
    pub fn new() -> Result<Self, ControllerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self { http })
    }

    /// Make sure `url` is cached at `target`.
    ///
    /// A missing archive at the source is a non-retryable error.
    pub async fn ensure(&self, url: &str, target: &Path) -> Result<(), ControllerError> {
        if tokio::fs::try_exists(target).await? {
            debug!("Using cached validation archive {}", target.display());
            return Ok(());
        }

        let head = self.http.head(url).send().await?;
        if !head.status().is_success() {
            return Err(ControllerError::non_retryable(format!(
                "validation archive does not exist at {url}: HEAD returned {}",
                head.status()
            )));
        }

        let dir = target
            .parent()
            .ok_or_else(|| ControllerError::InvalidConfig(format!("invalid cache path {}", target.display())))?;
        tokio::fs::create_dir_all(dir).await?;

        let mut response = self.http.get(url).send().await?.error_for_status()?;
        let partial = tempfile::NamedTempFile::new_in(dir)?;
        let mut file = tokio::fs::File::from_std(partial.reopen()?);
        let mut size = 0usize;
        while let Some(chunk) = response.chunk().await? {
            size += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        partial.persist(target).map_err(|e| ControllerError::Io(e.error))?;
        info!("Cached validation archive {} ({} bytes) at {}", url, size, target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    async fn serve_archive() -> String {
        let app = Router::new().route(
            "/validation_repository/catalog/bm-spr/validation.tar.gz",
            get(|| async { "archive-bytes" }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_downloads_into_cache() {
        let repo = serve_archive().await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("bm-spr/validation.tar.gz");

        let cache = ArtifactCache::new().unwrap();
        cache
            .ensure(&format!("{repo}/validation_repository/catalog/bm-spr/validation.tar.gz"), &target)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "archive-bytes");
    }

    #[tokio::test]
    async fn test_missing_archive_is_permanent() {
        let repo = serve_archive().await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("bm-icx/validation.tar.gz");

        let err = ArtifactCache::new()
            .unwrap()
            .ensure(&format!("{repo}/validation_repository/catalog/bm-icx/validation.tar.gz"), &target)
            .await
            .unwrap_err();
        assert!(err.is_non_retryable());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_cached_file_is_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("validation.tar.gz");
        std::fs::write(&target, "cached").unwrap();

        // Nothing listens on the discard port; the cache must not touch the network.
        ArtifactCache::new()
            .unwrap()
            .ensure("http://127.0.0.1:9/validation.tar.gz", &target)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "cached");
    }
}
