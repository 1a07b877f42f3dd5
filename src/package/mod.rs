//! Distribution package assembly.
//!
//! Runs only after a confirmed successful sign: copies the public
//! credential container next to the artifact, emits the trust-install
//! script and a short instructions file. The result is the folder handed
//! to the end user.

use crate::build::BuildArtifact;
use crate::certs::{self, Credential};
use crate::error::Result;
use handlebars::Handlebars;
use serde_json::json;
use std::path::{Path, PathBuf};

const INSTRUCTIONS_TEMPLATE: &str = "\
{{app_name}} - distribution package
===================================

Contents:
  {{artifact_file}}   the signed application
{{#if cer_file}}  {{cer_file}}   public certificate for trust installation
  install_cert.bat   imports the certificate into the local trust stores
{{/if}}

First run:
{{#if cer_file}}  1. Run install_cert.bat once (administrator prompt expected).
  2. Start {{artifact_file}}.
{{else}}  1. Start {{artifact_file}}.
{{/if}}
The signature carries a timestamp, so it stays valid after the
certificate itself expires.
";

/// A finished distribution directory.
#[derive(Debug, Clone)]
pub struct DistributionPackage {
    /// Directory containing everything handed to the end user
    pub dir: PathBuf,
    /// The signed artifact inside it
    pub artifact: PathBuf,
    /// Public container copied in, when the credential carried one
    pub cer: Option<PathBuf>,
}

/// Assembles the distribution directory around the signed artifact.
///
/// The artifact already lives in the dist directory; this stage adds the
/// trust-establishment materials beside it.
pub async fn assemble_distribution(
    dist_dir: &Path,
    artifact: &BuildArtifact,
    credential: &Credential,
) -> Result<DistributionPackage> {
    tokio::fs::create_dir_all(dist_dir).await?;

    let mut copied_cer = None;
    if let Some(cer) = &credential.cer {
        let target = dist_dir.join(
            cer.file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| format!("{}.cer", credential.name).into()),
        );
        tokio::fs::copy(cer, &target).await?;
        certs::write_trust_install_script(dist_dir, &artifact.app_name, &target).await?;
        copied_cer = Some(target);
    } else {
        log::warn!(
            "credential '{}' has no public container, skipping trust materials",
            credential.name
        );
    }

    write_instructions(dist_dir, artifact, copied_cer.as_deref()).await?;

    log::info!("distribution package assembled in {}", dist_dir.display());
    Ok(DistributionPackage {
        dir: dist_dir.to_path_buf(),
        artifact: artifact.path.clone(),
        cer: copied_cer,
    })
}

async fn write_instructions(
    dist_dir: &Path,
    artifact: &BuildArtifact,
    cer: Option<&Path>,
) -> Result<PathBuf> {
    let artifact_file = artifact
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| artifact.app_name.clone());
    let cer_file = cer.and_then(|p| p.file_name()).map(|n| n.to_string_lossy().into_owned());

    let handlebars = Handlebars::new();
    let text = handlebars
        .render_template(
            INSTRUCTIONS_TEMPLATE,
            &json!({
                "app_name": artifact.app_name,
                "artifact_file": artifact_file,
                "cer_file": cer_file,
            }),
        )
        .map_err(|e| anyhow::anyhow!("instructions rendering failed: {}", e))?;

    let path = dist_dir.join("README.txt");
    tokio::fs::write(&path, text).await?;
    Ok(path)
}
