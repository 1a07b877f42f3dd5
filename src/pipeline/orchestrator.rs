//! Pipeline orchestration.
//!
//! Sequences provisioning, dependency installation, credential resolution,
//! plan resolution, build, sign and packaging. Any stage failure aborts the
//! remaining sequence; artifacts of completed stages are left in place so a
//! retry can reuse them (a freshly created credential in particular).

use crate::build::Builder;
use crate::certs::{CertificateStore, Credential};
use crate::error::{PipelineError, Result};
use crate::net::NetworkGuard;
use crate::package;
use crate::pipeline::layout::Layout;
use crate::pipeline::request::{BuildRequest, CertSource, PipelineOutcome, SignerKind};
use crate::plan;
use crate::provision::{DependencyInstaller, ToolDescriptor, ToolProvisioner};
use crate::signing::{Signer, SigningBackend};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Download source for the bundled Windows signing tool.
const OSSLSIGNCODE_URL: &str =
    "https://github.com/mtrojnar/osslsigncode/releases/download/2.9/osslsigncode-2.9-windows-x64.zip";

/// Sequences the full provision-build-sign pipeline.
///
/// A single instance runs one invocation at a time; running two invocations
/// concurrently against the same credential name or build root is unsafe by
/// design and must be serialized by the caller.
#[derive(Debug)]
pub struct Pipeline {
    layout: Layout,
    network: NetworkGuard,
    tools: ToolProvisioner,
    deps: DependencyInstaller,
    certs: CertificateStore,
    builder: Builder,
    signer: Signer,
}

impl Pipeline {
    /// Builds a pipeline rooted at the given layout.
    pub fn new(layout: Layout) -> Self {
        let network = NetworkGuard::default();
        let certs = CertificateStore::new(layout.cert_store_dir());
        let builder = Builder::new(layout.clone());
        Self {
            tools: ToolProvisioner::new(network.clone()),
            deps: DependencyInstaller::new(network.clone()),
            certs,
            builder,
            signer: Signer::new(),
            network,
            layout,
        }
    }

    /// Credential store, exposed for ad-hoc front-end operations.
    pub fn certificate_store(&self) -> &CertificateStore {
        &self.certs
    }

    /// Builder, exposed for ad-hoc front-end operations.
    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    /// Signer, exposed for ad-hoc front-end operations.
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Runs the full pipeline for one request.
    pub async fn run(
        &self,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        log::info!("=== starting build pipeline ===");
        self.layout.ensure().await?;

        // Stage 1: tool and dependency provisioning.
        let signing_backend = self.resolve_signing_backend(request.signer, cancel).await?;
        if request.cert_backend == crate::certs::CertificateBackend::Portable {
            self.tools
                .ensure_system_package("openssl", &openssl_install_command())
                .await?;
        }
        let project_root = request
            .script
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self.deps.ensure_dependencies(&project_root, cancel).await?;

        // Stage 2: credential resolution, fail-fast before any build work.
        let credential = self.resolve_credential(request).await?;

        // Stage 3: canonical build plan.
        let resolved = plan::resolve(request)?;

        // Stage 4: build.
        let artifact = self.builder.build(&resolved).await?;

        // Stage 5: sign; the artifact stays unsigned in place on failure.
        self.signer
            .sign(
                &signing_backend,
                &artifact.path,
                &credential.pfx,
                &request.cert_password,
                &artifact.app_name,
            )
            .await?;

        // Stage 6: packaging, only after a confirmed successful sign.
        let dist = package::assemble_distribution(
            &self.layout.dist_dir(),
            &artifact,
            &credential,
        )
        .await?;

        log::info!("=== pipeline complete ===");
        log::info!("artifact: {}", dist.artifact.display());

        Ok(PipelineOutcome {
            artifact: dist.artifact,
            pfx: credential.pfx,
            cer: dist.cer,
            dist_dir: dist.dir,
        })
    }

    async fn resolve_credential(&self, request: &BuildRequest) -> Result<Credential> {
        match &request.cert_source {
            CertSource::External { pfx } => {
                if !pfx.is_file() {
                    return Err(PipelineError::CredentialNotFound(pfx.clone()));
                }
                let name = pfx
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "external".to_string());
                let cer = pfx.with_extension("cer");
                Ok(Credential {
                    name,
                    cer: cer.is_file().then_some(cer),
                    pfx: pfx.clone(),
                })
            }
            CertSource::CacheOrCreate { name } => {
                self.certs
                    .get_or_create(name, &request.cert_password, request.cert_backend)
                    .await
            }
        }
    }

    /// Resolves the signing backend, provisioning the tool when needed.
    ///
    /// A system-installed osslsigncode is preferred; on Windows a private
    /// copy is downloaded and unpacked on a miss. On other systems a miss
    /// is fatal with an install hint, since no prebuilt archive exists.
    pub async fn resolve_signing_backend(
        &self,
        kind: SignerKind,
        cancel: &CancellationToken,
    ) -> Result<SigningBackend> {
        match kind {
            SignerKind::OsNative => Ok(SigningBackend::OsNative),
            SignerKind::Osslsigncode => {
                if let Ok(path) = which::which("osslsigncode") {
                    let tool_dir = path
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| PathBuf::from("."));
                    log::debug!("using system osslsigncode at {}", path.display());
                    return Ok(SigningBackend::Osslsigncode { tool_dir });
                }

                if cfg!(windows) {
                    let tools_dir = self.layout.tools_dir();
                    let descriptor = ToolDescriptor {
                        name: "osslsigncode".to_string(),
                        binary: tools_dir.join("osslsigncode.exe"),
                        archive_url: OSSLSIGNCODE_URL.to_string(),
                        sha256: None,
                    };
                    let binary = self.tools.ensure_tool(&descriptor, cancel).await?;
                    let tool_dir = binary
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or(tools_dir);
                    Ok(SigningBackend::Osslsigncode { tool_dir })
                } else {
                    Err(PipelineError::ToolProvisioning {
                        tool: "osslsigncode".to_string(),
                        reason: "not found on PATH; install it (e.g. brew install osslsigncode \
                                 or your distribution's package) or use the os-native signer"
                            .to_string(),
                    })
                }
            }
        }
    }

    /// Network guard, exposed for ad-hoc front-end operations.
    pub fn network(&self) -> &NetworkGuard {
        &self.network
    }
}

fn openssl_install_command() -> Vec<String> {
    if cfg!(windows) {
        [
            "winget",
            "install",
            "-e",
            "--id",
            "ShiningLight.OpenSSL",
            "--accept-source-agreements",
            "--accept-package-agreements",
            "--silent",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    } else {
        // Best-effort only; package managers vary too much to guess.
        Vec::new()
    }
}
