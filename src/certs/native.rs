//! Native credential backend.
//!
//! Issues the key pair through the OS certificate subsystem via PowerShell,
//! then exports the password-protected private container and the public
//! container. Only meaningful on Windows hosts; elsewhere the portable
//! backend is the right choice.

use super::CreateRequest;
use crate::error::{PipelineError, Result};
use path_absolutize::Absolutize;

pub(crate) async fn create(request: &CreateRequest<'_>) -> Result<()> {
    let pfx = request.pfx.absolutize()?.display().to_string();
    let cer = request.cer.absolutize()?.display().to_string();

    // -Type CodeSigningCert scopes the key usage; the export password never
    // touches disk, it rides in the SecureString only.
    let script = format!(
        r#"$ErrorActionPreference = 'Stop'
$cert = New-SelfSignedCertificate -DnsName "{name}" -CertStoreLocation "Cert:\CurrentUser\My" -Type CodeSigningCert -FriendlyName "signforge-{name}"
$pwd = ConvertTo-SecureString -String "{password}" -Force -AsPlainText
Export-PfxCertificate -Cert $cert -FilePath "{pfx}" -Password $pwd | Out-Null
Export-Certificate -Cert $cert -FilePath "{cer}" | Out-Null
Write-Output "CERT_CREATED""#,
        name = request.name,
        password = request.password,
        pfx = pfx,
        cer = cer,
    );

    let output = tokio::process::Command::new("powershell")
        .args(["-NoProfile", "-Command", &script])
        .output()
        .await
        .map_err(|e| PipelineError::CredentialCreation {
            name: request.name.to_string(),
            reason: format!("failed to start powershell: {e}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() || !stdout.contains("CERT_CREATED") {
        return Err(PipelineError::CredentialCreation {
            name: request.name.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}
