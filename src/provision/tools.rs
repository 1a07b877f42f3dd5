//! External tool provisioning.
//!
//! Ensures required binaries exist locally before the pipeline uses them,
//! downloading and unpacking packaged distributions on demand. A tool is
//! trusted only if its binary exists with non-zero size; anything else is
//! treated as a partial download and re-provisioned.

use crate::error::{PipelineError, Result};
use crate::net::NetworkGuard;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Best-effort budget for system package-manager installs.
const SYSTEM_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Describes one provisionable tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Logical tool name, used in diagnostics
    pub name: String,
    /// Expected path of the primary binary inside the tool directory
    pub binary: PathBuf,
    /// URL of the packaged (zip) distribution
    pub archive_url: String,
    /// Optional SHA-256 of the archive
    pub sha256: Option<String>,
}

/// Downloads and unpacks missing tools.
#[derive(Debug)]
pub struct ToolProvisioner {
    network: NetworkGuard,
}

impl ToolProvisioner {
    pub fn new(network: NetworkGuard) -> Self {
        Self { network }
    }

    /// Ensures the described tool is usable, returning its binary path.
    ///
    /// Present means: the expected binary exists AND has non-zero size.
    /// On a miss the archive is downloaded through the network guard and
    /// its executable and shared-library entries are flattened directly
    /// into the tool directory, so dependencies of the primary binary
    /// co-locate with it and resolve at run time. If the primary binary is
    /// not among the extracted entries the directory is cleaned up and the
    /// provisioning fails loudly.
    pub async fn ensure_tool(
        &self,
        descriptor: &ToolDescriptor,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if is_present(&descriptor.binary).await {
            log::debug!(
                "tool '{}' already present at {}",
                descriptor.name,
                descriptor.binary.display()
            );
            return Ok(descriptor.binary.clone());
        }

        let tool_dir = descriptor
            .binary
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| PipelineError::ToolProvisioning {
                tool: descriptor.name.clone(),
                reason: "tool binary path has no parent directory".into(),
            })?;
        tokio::fs::create_dir_all(&tool_dir).await?;

        let archive_name = archive_file_name(&descriptor.archive_url);
        let archive_path = tool_dir.join(&archive_name);

        log::info!("provisioning tool '{}'", descriptor.name);
        self.network
            .download_file(
                &descriptor.archive_url,
                &archive_path,
                descriptor.sha256.as_deref(),
                cancel,
            )
            .await?;

        let extract_result = extract_tool_archive(&archive_path, &tool_dir).await;
        // The archive itself is never needed after extraction.
        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            log::warn!("failed to remove {}: {}", archive_path.display(), e);
        }
        extract_result.map_err(|e| PipelineError::ToolProvisioning {
            tool: descriptor.name.clone(),
            reason: e.to_string(),
        })?;

        if !is_present(&descriptor.binary).await {
            // Partial extraction must not masquerade as a provisioned tool.
            if let Err(e) = tokio::fs::remove_dir_all(&tool_dir).await {
                log::warn!("failed to clean {}: {}", tool_dir.display(), e);
            }
            return Err(PipelineError::ToolProvisioning {
                tool: descriptor.name.clone(),
                reason: format!(
                    "primary binary {} not found in extracted archive",
                    descriptor.binary.display()
                ),
            });
        }

        log::info!(
            "tool '{}' provisioned at {}",
            descriptor.name,
            descriptor.binary.display()
        );
        Ok(descriptor.binary.clone())
    }

    /// Best-effort system-wide install of a missing binary.
    ///
    /// Looks the binary up on PATH first; if missing, runs the supplied
    /// package-manager command under a timeout. Non-zero exit and timeout
    /// are logged and tolerated: the pipeline bundles a private copy of the
    /// signing tooling and does not strictly require a system install.
    pub async fn ensure_system_package(&self, binary: &str, install_cmd: &[String]) -> Result<()> {
        if which::which(binary).is_ok() {
            log::debug!("'{}' already available on PATH", binary);
            return Ok(());
        }
        let Some((program, args)) = install_cmd.split_first() else {
            log::warn!("'{}' missing and no installer command configured", binary);
            return Ok(());
        };

        log::info!("'{}' missing, attempting system install", binary);
        let run = tokio::process::Command::new(program).args(args).output();

        match tokio::time::timeout(SYSTEM_INSTALL_TIMEOUT, run).await {
            Ok(Ok(output)) if output.status.success() => {
                log::info!("system install of '{}' completed", binary);
            }
            Ok(Ok(output)) => {
                log::warn!(
                    "system install of '{}' exited with {:?}: {}",
                    binary,
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(Err(e)) => {
                log::warn!("system install of '{}' could not start: {}", binary, e);
            }
            Err(_) => {
                log::warn!("system install of '{}' timed out", binary);
            }
        }
        Ok(())
    }
}

/// Presence check: exists with non-zero length.
async fn is_present(binary: &Path) -> bool {
    match tokio::fs::metadata(binary).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Derives a local file name for the archive from its URL.
fn archive_file_name(archive_url: &str) -> String {
    url::Url::parse(archive_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "tool-archive.zip".to_string())
}

/// Extracts executable and shared-library entries, flattened into `dest`.
///
/// Directory entries are skipped; nested archive paths are collapsed so the
/// primary binary and its libraries end up side by side.
async fn extract_tool_archive(archive: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| anyhow::anyhow!("unreadable archive {}: {}", archive.display(), e))?;

        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|e| anyhow::anyhow!("corrupt archive entry: {}", e))?;
            if entry.is_dir() {
                continue;
            }
            let Some(name) = entry
                .enclosed_name()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            else {
                continue;
            };
            if !is_tool_payload(&name, entry.unix_mode()) {
                continue;
            }

            let mut contents = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut contents)?;
            let out = dest.join(&name);
            std::fs::write(&out, contents)?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode))?;
            }

            log::debug!("extracted {}", name);
        }
        Ok(())
    })
    .await
    .map_err(|e| anyhow::anyhow!("archive extraction task panicked: {}", e))?
}

/// Executable or shared-library entries are the only payload worth keeping.
fn is_tool_payload(name: &str, unix_mode: Option<u32>) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".exe")
        || lower.ends_with(".dll")
        || lower.ends_with(".dylib")
        || lower.contains(".so")
    {
        return true;
    }
    unix_mode.is_some_and(|m| m & 0o111 != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_name_comes_from_the_url_path() {
        assert_eq!(
            archive_file_name("https://example.com/dist/osslsigncode-2.9-windows-x64.zip"),
            "osslsigncode-2.9-windows-x64.zip"
        );
        assert_eq!(archive_file_name("not a url"), "tool-archive.zip");
    }

    #[tokio::test]
    async fn extraction_flattens_binaries_and_skips_documentation() {
        use std::io::Write;

        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("tool.zip");

        let file = std::fs::File::create(&archive).expect("create archive");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("nested/", options).expect("dir entry");
        for (name, body) in [
            ("nested/osslsigncode.exe", b"binary".as_slice()),
            ("nested/libcrypto-3-x64.dll", b"library".as_slice()),
            ("README.md", b"docs".as_slice()),
        ] {
            writer.start_file(name, options).expect("entry");
            writer.write_all(body).expect("entry body");
        }
        writer.finish().expect("finish archive");

        let dest = dir.path().join("tools");
        std::fs::create_dir_all(&dest).expect("dest dir");
        extract_tool_archive(&archive, &dest).await.expect("extract");

        assert!(dest.join("osslsigncode.exe").is_file());
        assert!(dest.join("libcrypto-3-x64.dll").is_file());
        assert!(!dest.join("README.md").exists());
        assert!(!dest.join("nested").exists());
    }

    #[test]
    fn payload_filter_keeps_binaries_and_libraries() {
        assert!(is_tool_payload("osslsigncode.exe", None));
        assert!(is_tool_payload("libcrypto-3-x64.dll", None));
        assert!(is_tool_payload("libssl.so.3", None));
        assert!(is_tool_payload("osslsigncode", Some(0o755)));
        assert!(!is_tool_payload("README.md", Some(0o644)));
        assert!(!is_tool_payload("LICENSE", None));
    }
}
