//! Code-signing credential store.
//!
//! Credentials are cached on disk as `<name>.pfx` / `<name>.cer` pairs
//! under a fixed store directory and created at most once per logical name.
//! Creation goes through one of two interchangeable backends that both
//! produce the same two-container shape, so callers stay backend-agnostic.

mod native;
mod portable;

use crate::error::{PipelineError, Result};
use handlebars::Handlebars;
use serde_json::json;
use std::path::{Path, PathBuf};

/// A cached signing credential.
///
/// Valid only if the private container exists; the public container is
/// optional but required for downstream trust-installation packaging.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Logical name the pair is keyed by
    pub name: String,
    /// Password-protected private container
    pub pfx: PathBuf,
    /// Public container, when exported
    pub cer: Option<PathBuf>,
}

/// Closed set of credential-creation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateBackend {
    /// OS certificate subsystem (PowerShell `New-SelfSignedCertificate`)
    Native,
    /// OpenSSL subprocess, repackaged into the same pfx/cer shape
    Portable,
}

/// Parameters handed to a creation backend.
#[derive(Debug)]
pub(crate) struct CreateRequest<'a> {
    pub name: &'a str,
    pub password: &'a str,
    pub pfx: &'a Path,
    pub cer: &'a Path,
}

impl CertificateBackend {
    pub(crate) async fn create(&self, request: &CreateRequest<'_>) -> Result<()> {
        match self {
            CertificateBackend::Native => native::create(request).await,
            CertificateBackend::Portable => portable::create(request).await,
        }
    }
}

/// On-disk store of credential pairs.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    dir: PathBuf,
}

impl CertificateStore {
    /// Opens a store rooted at `dir` (created lazily on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn pfx_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.pfx"))
    }

    fn cer_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.cer"))
    }

    /// Returns the cached pair for `name`, creating it on a miss.
    ///
    /// Cache hit (both containers present) returns unchanged with zero
    /// backend invocations: a credential is never regenerated implicitly
    /// under the same name. On a miss, exactly one backend is invoked and
    /// both containers must exist afterwards.
    pub async fn get_or_create(
        &self,
        name: &str,
        password: &str,
        backend: CertificateBackend,
    ) -> Result<Credential> {
        let pfx = self.pfx_path(name);
        let cer = self.cer_path(name);

        if file_exists(&pfx).await && file_exists(&cer).await {
            log::info!("reusing cached credential '{}'", name);
            return Ok(Credential {
                name: name.to_string(),
                pfx,
                cer: Some(cer),
            });
        }

        log::info!("creating new code-signing credential '{}'", name);
        tokio::fs::create_dir_all(&self.dir).await?;

        let request = CreateRequest {
            name,
            password,
            pfx: &pfx,
            cer: &cer,
        };
        backend.create(&request).await?;

        if !file_exists(&pfx).await || !file_exists(&cer).await {
            return Err(PipelineError::CredentialCreation {
                name: name.to_string(),
                reason: "backend reported success but containers are missing".into(),
            });
        }

        log::info!("credential created: {}", pfx.display());
        Ok(Credential {
            name: name.to_string(),
            pfx,
            cer: Some(cer),
        })
    }

    /// Enumerates credentials by the private containers present in the store.
    pub async fn list_available(&self) -> Result<Vec<Credential>> {
        let mut credentials = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(credentials),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pfx") {
                continue;
            }
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let cer = self.cer_path(&name);
            credentials.push(Credential {
                cer: file_exists(&cer).await.then_some(cer),
                name,
                pfx: path,
            });
        }

        credentials.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(credentials)
    }
}

const TRUST_SCRIPT_TEMPLATE: &str = "\
@echo off\r\n\
echo Installing certificate for {{app_name}}...\r\n\
echo.\r\n\
echo NOTE: please confirm the administrator prompt.\r\n\
echo The certificate is imported into 'TrustedPeople' and 'Root'.\r\n\
echo.\r\n\
certutil -addstore -f \"TrustedPeople\" \"%~dp0{{cer_file}}\"\r\n\
certutil -addstore -f \"Root\" \"%~dp0{{cer_file}}\"\r\n\
echo.\r\n\
echo Certificate installed. The application should now start without a warning.\r\n\
pause\r\n";

/// Writes the end-user trust-install script next to the distributed artifact.
///
/// The script imports the public container into the trust stores the signed
/// executable needs to run without a warning.
pub async fn write_trust_install_script(
    output_dir: &Path,
    app_name: &str,
    cer: &Path,
) -> Result<PathBuf> {
    let cer_file = cer
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::CredentialNotFound(cer.to_path_buf()))?;

    let handlebars = Handlebars::new();
    let script = handlebars
        .render_template(
            TRUST_SCRIPT_TEMPLATE,
            &json!({ "app_name": app_name, "cer_file": cer_file }),
        )
        .map_err(|e| anyhow::anyhow!("trust script rendering failed: {}", e))?;

    let script_path = output_dir.join("install_cert.bat");
    tokio::fs::write(&script_path, script).await?;
    log::info!("trust-install script written: {}", script_path.display());
    Ok(script_path)
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
