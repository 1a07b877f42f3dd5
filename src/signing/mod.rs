//! Code-signing backends with atomic artifact replacement.
//!
//! Two interchangeable strategies sign the produced executable against a
//! pfx credential. Both follow the same discipline: the signed output is
//! written to a sibling temp path and only promoted over the original on
//! confirmed success, so no partially-signed state is ever visible at the
//! artifact path. A failed backend leaves the original byte-for-byte
//! untouched.

use crate::error::{PipelineError, Result};
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

/// Default timestamp server; keeps signatures valid past cert expiry.
pub const DEFAULT_TIMESTAMP_URL: &str = "http://timestamp.digicert.com";

/// Closed set of signing backends.
#[derive(Debug, Clone)]
pub enum SigningBackend {
    /// The provisioned osslsigncode binary, run from its own directory so
    /// its co-located shared libraries resolve
    Osslsigncode {
        /// Directory holding the binary and its libraries
        tool_dir: PathBuf,
    },
    /// OS-native signing facility (PowerShell `Set-AuthenticodeSignature`)
    OsNative,
}

/// Signs artifacts produced by the builder.
#[derive(Debug)]
pub struct Signer {
    timestamp_url: String,
}

impl Default for Signer {
    fn default() -> Self {
        Self {
            timestamp_url: DEFAULT_TIMESTAMP_URL.to_string(),
        }
    }
}

impl Signer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the timestamp server URL.
    pub fn with_timestamp_url(mut self, url: impl Into<String>) -> Self {
        self.timestamp_url = url.into();
        self
    }

    /// Signs `artifact` in place using `credential` and the chosen backend.
    ///
    /// All paths are resolved to absolute form first, because both backends
    /// run with a working directory different from the caller's.
    pub async fn sign(
        &self,
        backend: &SigningBackend,
        artifact: &Path,
        pfx: &Path,
        password: &str,
        display_name: &str,
    ) -> Result<()> {
        let artifact = artifact.absolutize()?.into_owned();
        let pfx = pfx.absolutize()?.into_owned();

        if !pfx.is_file() {
            return Err(PipelineError::CredentialNotFound(pfx));
        }

        log::info!(
            "signing {} with {}",
            artifact.display(),
            pfx.display()
        );

        match backend {
            SigningBackend::Osslsigncode { tool_dir } => {
                self.sign_with_osslsigncode(tool_dir, &artifact, &pfx, password, display_name)
                    .await
            }
            SigningBackend::OsNative => self.sign_with_os_native(&artifact, &pfx, password).await,
        }?;

        log::info!("signature applied: {}", artifact.display());
        Ok(())
    }

    async fn sign_with_osslsigncode(
        &self,
        tool_dir: &Path,
        artifact: &Path,
        pfx: &Path,
        password: &str,
        display_name: &str,
    ) -> Result<()> {
        let binary = tool_dir.join(osslsigncode_binary_name());
        let signed_temp = signed_temp_path(artifact);

        // OPENSSL_MODULES points the crypto library at its pluggable
        // algorithm-module directory, co-located with the binary.
        let output = tokio::process::Command::new(&binary)
            .current_dir(tool_dir)
            .env("OPENSSL_MODULES", tool_dir)
            .arg("sign")
            .args(["-pkcs12", &pfx.display().to_string()])
            .args(["-pass", password])
            .args(["-n", display_name])
            .args(["-t", &self.timestamp_url])
            .args(["-in", &artifact.display().to_string()])
            .args(["-out", &signed_temp.display().to_string()])
            .output()
            .await?;

        let temp_exists = tokio::fs::metadata(&signed_temp)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);

        if !output.status.success() || !temp_exists {
            remove_quietly(&signed_temp).await;
            return Err(PipelineError::SigningBackendFailure {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        replace_artifact(&signed_temp, artifact).await
    }

    async fn sign_with_os_native(
        &self,
        artifact: &Path,
        pfx: &Path,
        password: &str,
    ) -> Result<()> {
        let signed_temp = signed_temp_path(artifact);
        tokio::fs::copy(artifact, &signed_temp).await?;

        let script = format!(
            r#"$ErrorActionPreference = 'Stop'
$pwd = ConvertTo-SecureString -String "{password}" -Force -AsPlainText
$cert = Get-PfxCertificate -FilePath "{pfx}" -Password $pwd
$sig = Set-AuthenticodeSignature -FilePath "{target}" -Certificate $cert -TimestampServer "{timestamp}"
if ($sig.Status -eq 'Valid') {{ Write-Output "SIGNATURE_VALID" }} else {{ Write-Output $sig.StatusMessage }}"#,
            password = password,
            pfx = pfx.display(),
            target = signed_temp.display(),
            timestamp = self.timestamp_url,
        );

        let output = match tokio::process::Command::new("powershell")
            .args(["-NoProfile", "-Command", &script])
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                remove_quietly(&signed_temp).await;
                return Err(e.into());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || !stdout.contains("SIGNATURE_VALID") {
            remove_quietly(&signed_temp).await;
            return Err(PipelineError::SigningBackendFailure {
                code: output.status.code(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        replace_artifact(&signed_temp, artifact).await
    }
}

/// Sibling temp path the signed output is written to.
pub(crate) fn signed_temp_path(artifact: &Path) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    name.push_str(".signed");
    artifact.with_file_name(name)
}

/// Atomic replace: remove the original, rename the signed temp into place.
///
/// Single winner; any external observer sees either the unsigned or the
/// fully signed file, never an intermediate.
async fn replace_artifact(signed_temp: &Path, artifact: &Path) -> Result<()> {
    tokio::fs::remove_file(artifact).await?;
    tokio::fs::rename(signed_temp, artifact).await?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}

fn osslsigncode_binary_name() -> &'static str {
    if cfg!(windows) {
        "osslsigncode.exe"
    } else {
        "osslsigncode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_temp_is_a_sibling_of_the_artifact() {
        let temp = signed_temp_path(Path::new("/builds/dist/MyTool.exe"));
        assert_eq!(temp, Path::new("/builds/dist/MyTool.exe.signed"));
    }
}
