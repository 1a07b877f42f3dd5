//! Network resilience layer.
//!
//! Everything the pipeline does over the wire goes through [`NetworkGuard`]:
//! connectivity probing, a blocking wait-for-recovery loop, a bounded retry
//! wrapper, and digest-verified downloads that are atomically promoted so a
//! half-written tool payload is never observable at its final path.

use crate::error::{PipelineError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Maximum attempts for [`NetworkGuard::run_with_retry`].
const RETRY_LIMIT: u32 = 5;

/// Backoff cap for the connectivity wait loop.
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Connectivity probing and download hardening.
///
/// The probe target defaults to a public DNS endpoint on TCP port 53,
/// which survives networks where ICMP is filtered.
#[derive(Debug, Clone)]
pub struct NetworkGuard {
    probe_addr: String,
    probe_timeout: Duration,
}

impl Default for NetworkGuard {
    fn default() -> Self {
        Self {
            probe_addr: "8.8.8.8:53".to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl NetworkGuard {
    /// Creates a guard probing a custom endpoint, mainly for tests.
    pub fn with_probe(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_addr: addr.into(),
            probe_timeout: timeout,
        }
    }

    /// Attempts a short-timeout TCP connect to the probe endpoint.
    ///
    /// Returns `false` on any socket error or timeout. No side effects.
    pub async fn check_connectivity(&self) -> bool {
        matches!(
            tokio::time::timeout(
                self.probe_timeout,
                tokio::net::TcpStream::connect(&self.probe_addr),
            )
            .await,
            Ok(Ok(_))
        )
    }

    /// Blocks until connectivity returns or `cancel` fires.
    ///
    /// Uses capped backoff (1s ramping to 5s) and emits a progress line
    /// every 5 attempts so long outages remain visible. This is a liveness
    /// wait, not a deadline wait: provisioning cannot meaningfully continue
    /// offline, so the only escape hatches are recovery and cancellation.
    pub async fn wait_for_connectivity(&self, cancel: &CancellationToken) -> Result<()> {
        if self.check_connectivity().await {
            return Ok(());
        }

        log::warn!("network unavailable, waiting for recovery...");
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let backoff = BACKOFF_CAP.min(Duration::from_millis(1000 + u64::from(attempt) * 500));

            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }

            if self.check_connectivity().await {
                log::info!(
                    "network connectivity restored after {}s",
                    started.elapsed().as_secs()
                );
                return Ok(());
            }

            if attempt % 5 == 0 {
                log::info!(
                    "still waiting for network ({}s elapsed)",
                    started.elapsed().as_secs()
                );
            }
        }
    }

    /// Runs `op`, retrying network-classified failures up to 5 times.
    ///
    /// Each attempt is preceded by a connectivity wait. Errors that are not
    /// network-related propagate immediately without retry; exhausting the
    /// attempt budget yields [`PipelineError::RetriesExhausted`].
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = String::new();

        for attempt in 1..=RETRY_LIMIT {
            self.wait_for_connectivity(cancel).await?;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_network_related() => {
                    log::warn!(
                        "attempt {}/{} failed with network error: {}",
                        attempt,
                        RETRY_LIMIT,
                        e
                    );
                    last_error = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(PipelineError::RetriesExhausted {
            attempts: RETRY_LIMIT,
            last_error,
        })
    }

    /// Downloads `url` to `target`, optionally verifying a SHA-256 digest.
    ///
    /// The response is streamed to a `.part` sibling while the digest is
    /// computed incrementally. A digest mismatch deletes the partial file
    /// and fails; success renames the sibling over any pre-existing target.
    /// No partially-written file is ever left at the final path.
    pub async fn download_file(
        &self,
        url: &str,
        target: &Path,
        expected_sha256: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.wait_for_connectivity(cancel).await?;

        let temp = part_path(target);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        log::info!("downloading {}", url);

        let result = self.stream_to_temp(url, &temp).await;
        let digest = match result {
            Ok(digest) => digest,
            Err(e) => {
                remove_quietly(&temp).await;
                return Err(e);
            }
        };

        finalize_download(&temp, target, expected_sha256, &digest).await?;
        log::info!("download complete: {}", target.display());
        Ok(())
    }

    async fn stream_to_temp(&self, url: &str, temp: &Path) -> Result<String> {
        let response = reqwest::get(url).await?.error_for_status().map_err(|e| {
            PipelineError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut file = tokio::fs::File::create(temp).await?;
        let mut hasher = Sha256::new();
        let mut response = response;

        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(hex::encode(hasher.finalize()))
    }
}

/// Temp sibling used while a download is in flight.
pub(crate) fn part_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    name.push_str(".part");
    target.with_file_name(name)
}

/// Verifies the computed digest and atomically promotes the temp file.
///
/// On mismatch the temp file is removed and [`PipelineError::DigestMismatch`]
/// is returned; on match (or when no digest was supplied) the temp file is
/// renamed over the target.
pub(crate) async fn finalize_download(
    temp: &Path,
    target: &Path,
    expected_sha256: Option<&str>,
    actual_sha256: &str,
) -> Result<()> {
    if let Some(expected) = expected_sha256 {
        if !expected.eq_ignore_ascii_case(actual_sha256) {
            remove_quietly(temp).await;
            return Err(PipelineError::DigestMismatch {
                path: target.to_path_buf(),
                expected: expected.to_string(),
                actual: actual_sha256.to_string(),
            });
        }
        log::debug!("download integrity verified (SHA-256 match)");
    }

    tokio::fs::rename(temp, target).await?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_appends_suffix() {
        let p = part_path(Path::new("/tmp/tools/osslsigncode.zip"));
        assert_eq!(p, Path::new("/tmp/tools/osslsigncode.zip.part"));
    }

    #[tokio::test]
    async fn unreachable_probe_reports_offline() {
        // TEST-NET-1 address, guaranteed unroutable
        let guard = NetworkGuard::with_probe("192.0.2.1:9", Duration::from_millis(200));
        assert!(!guard.check_connectivity().await);
    }

    #[tokio::test]
    async fn digest_mismatch_leaves_no_file_at_the_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("tool.zip");
        let temp = part_path(&target);
        tokio::fs::write(&temp, b"payload").await.expect("write temp");

        let result = finalize_download(&temp, &target, Some("deadbeef"), "cafebabe").await;
        assert!(matches!(result, Err(PipelineError::DigestMismatch { .. })));
        assert!(!temp.exists());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn matching_digest_promotes_the_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("tool.zip");
        let temp = part_path(&target);
        tokio::fs::write(&temp, b"payload").await.expect("write temp");

        finalize_download(&temp, &target, Some("ABCD"), "abcd")
            .await
            .expect("promote");
        assert!(!temp.exists());
        assert_eq!(std::fs::read(&target).expect("read target"), b"payload");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_the_wait_loop() {
        let guard = NetworkGuard::with_probe("192.0.2.1:9", Duration::from_millis(100));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = guard
            .run_with_retry(&cancel, || async {
                Err(PipelineError::DependencyInstall("bad manifest".into()))
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
