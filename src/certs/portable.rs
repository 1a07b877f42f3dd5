//! Portable credential backend.
//!
//! Generates a key and self-signed certificate with explicit code-signing
//! key-usage extensions through the OpenSSL CLI, then repackages into the
//! same pfx/cer shape the native backend produces. Raw key material and the
//! scratch request config are deleted afterwards; cleanup failures are
//! logged as warnings but never fail the creation.

use super::CreateRequest;
use crate::error::{PipelineError, Result};
use path_absolutize::Absolutize;
use std::path::Path;

const CERT_DAYS: &str = "1095";

const REQ_CONFIG: &str = "\
[req]
distinguished_name = dn
x509_extensions = v3_codesign
prompt = no

[dn]
CN = {CN}

[v3_codesign]
basicConstraints = CA:FALSE
keyUsage = digitalSignature
extendedKeyUsage = codeSigning
";

pub(crate) async fn create(request: &CreateRequest<'_>) -> Result<()> {
    let openssl = which::which("openssl").map_err(|_| PipelineError::CredentialCreation {
        name: request.name.to_string(),
        reason: "openssl not found on PATH".into(),
    })?;

    let store_dir = request
        .pfx
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let key_pem = store_dir.join(format!("{}.key.pem", request.name));
    let cert_pem = store_dir.join(format!("{}.cert.pem", request.name));
    let config = store_dir.join(format!("{}.req.cnf", request.name));

    tokio::fs::write(&config, REQ_CONFIG.replace("{CN}", request.name)).await?;

    let result = generate(&openssl, request, &key_pem, &cert_pem, &config).await;

    // No secret residue on disk regardless of outcome.
    for scratch in [&key_pem, &cert_pem, &config] {
        if let Err(e) = tokio::fs::remove_file(scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove scratch file {}: {}", scratch.display(), e);
            }
        }
    }

    result
}

async fn generate(
    openssl: &Path,
    request: &CreateRequest<'_>,
    key_pem: &Path,
    cert_pem: &Path,
    config: &Path,
) -> Result<()> {
    let pfx = request.pfx.absolutize()?.display().to_string();
    let cer = request.cer.absolutize()?.display().to_string();

    run_openssl(
        openssl,
        request.name,
        &[
            "req",
            "-x509",
            "-newkey",
            "rsa:2048",
            "-nodes",
            "-days",
            CERT_DAYS,
            "-keyout",
            &key_pem.display().to_string(),
            "-out",
            &cert_pem.display().to_string(),
            "-config",
            &config.display().to_string(),
        ],
    )
    .await?;

    run_openssl(
        openssl,
        request.name,
        &[
            "pkcs12",
            "-export",
            "-inkey",
            &key_pem.display().to_string(),
            "-in",
            &cert_pem.display().to_string(),
            "-name",
            request.name,
            "-passout",
            &format!("pass:{}", request.password),
            "-out",
            &pfx,
        ],
    )
    .await?;

    run_openssl(
        openssl,
        request.name,
        &[
            "x509",
            "-in",
            &cert_pem.display().to_string(),
            "-outform",
            "DER",
            "-out",
            &cer,
        ],
    )
    .await?;

    Ok(())
}

async fn run_openssl(openssl: &Path, name: &str, args: &[&str]) -> Result<()> {
    log::debug!("openssl {}", args.join(" "));
    let output = tokio::process::Command::new(openssl)
        .args(args)
        .output()
        .await
        .map_err(|e| PipelineError::CredentialCreation {
            name: name.to_string(),
            reason: format!("failed to start openssl: {e}"),
        })?;

    if !output.status.success() {
        return Err(PipelineError::CredentialCreation {
            name: name.to_string(),
            reason: format!(
                "openssl {} exited with {:?}: {}",
                args.first().unwrap_or(&""),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}
