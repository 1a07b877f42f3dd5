//! Script-level dependency installation.
//!
//! Detects which dependency manager governs the project and installs only
//! what is missing. A lock-style manifest (poetry.lock) delegates wholesale
//! to that manager; otherwise the line-oriented requirements manifest is
//! parsed and the missing subset is installed in one batched call.

use crate::error::{PipelineError, Result};
use crate::net::NetworkGuard;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Installs missing script dependencies for a project.
#[derive(Debug)]
pub struct DependencyInstaller {
    network: NetworkGuard,
    python: String,
}

impl DependencyInstaller {
    pub fn new(network: NetworkGuard) -> Self {
        Self {
            network,
            python: default_python(),
        }
    }

    /// Overrides the interpreter used for pip probing and installs.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Detects the project's dependency manifest and installs what is missing.
    ///
    /// Installing zero packages is a no-op success; the short-circuit keeps
    /// repeated runs fast and avoids needless network calls.
    pub async fn ensure_dependencies(
        &self,
        project_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        log::info!("analyzing environment in {}", project_root.display());

        if std::env::var_os("VIRTUAL_ENV").is_none() {
            log::warn!("no active virtualenv detected, installs go to the global interpreter");
        }

        let pyproject = project_root.join("pyproject.toml");
        let poetry_lock = project_root.join("poetry.lock");
        let requirements = project_root.join("requirements.txt");

        if pyproject.exists() && poetry_lock.exists() {
            self.install_with_poetry(project_root, cancel).await
        } else if requirements.exists() {
            self.install_from_requirements(&requirements, cancel).await
        } else {
            log::info!("no dependency manifest found, nothing to install");
            Ok(())
        }
    }

    async fn install_with_poetry(
        &self,
        project_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        log::info!("poetry project detected");
        let poetry = which::which("poetry").map_err(|_| {
            PipelineError::DependencyInstall(
                "poetry.lock present but poetry is not on PATH".into(),
            )
        })?;

        self.network
            .run_with_retry(cancel, || {
                let poetry = poetry.clone();
                async move {
                    let output = tokio::process::Command::new(&poetry)
                        .args(["install", "--no-root"])
                        .current_dir(project_root)
                        .output()
                        .await?;
                    if output.status.success() {
                        Ok(())
                    } else {
                        Err(PipelineError::DependencyInstall(
                            String::from_utf8_lossy(&output.stderr).trim().to_string(),
                        ))
                    }
                }
            })
            .await?;

        log::info!("poetry install completed");
        Ok(())
    }

    async fn install_from_requirements(
        &self,
        manifest: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        log::info!("checking dependencies from {}", manifest.display());
        let text = tokio::fs::read_to_string(manifest).await?;
        let requested = parse_requirements(&text);

        let mut missing = Vec::new();
        for spec in &requested {
            if !self.is_installed(package_base_name(spec)).await {
                missing.push(spec.clone());
            }
        }

        if missing.is_empty() {
            log::info!("all {} dependencies already satisfied", requested.len());
            return Ok(());
        }

        log::info!("installing {} missing packages", missing.len());
        self.network
            .run_with_retry(cancel, || {
                let missing = missing.clone();
                async move {
                    let output = tokio::process::Command::new(&self.python)
                        .args(["-m", "pip", "install"])
                        .args(&missing)
                        .output()
                        .await?;
                    if output.status.success() {
                        Ok(())
                    } else {
                        Err(PipelineError::DependencyInstall(
                            String::from_utf8_lossy(&output.stderr).trim().to_string(),
                        ))
                    }
                }
            })
            .await?;

        log::info!("pip install completed");
        Ok(())
    }

    /// Cheap presence probe, not a full resolver dry-run.
    async fn is_installed(&self, package: &str) -> bool {
        tokio::process::Command::new(&self.python)
            .args(["-m", "pip", "show", "--quiet", package])
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

fn default_python() -> String {
    if cfg!(windows) { "python" } else { "python3" }.to_string()
}

/// Parses a line-oriented requirements manifest, skipping blanks and comments.
pub fn parse_requirements(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Strips version constraints and extras from a requirement specifier.
pub fn package_base_name(spec: &str) -> &str {
    let end = spec
        .find(['=', '>', '<', '~', '!', '[', ';', ' '])
        .unwrap_or(spec.len());
    spec[..end].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_parsing_skips_noise() {
        let manifest = "\n# build deps\nrequests==2.31.0\n\n  pyyaml>=6.0  \n# trailing\n";
        assert_eq!(
            parse_requirements(manifest),
            vec!["requests==2.31.0", "pyyaml>=6.0"]
        );
    }

    #[test]
    fn base_name_drops_constraints_and_extras() {
        assert_eq!(package_base_name("requests==2.31.0"), "requests");
        assert_eq!(package_base_name("pyyaml>=6.0"), "pyyaml");
        assert_eq!(package_base_name("uvicorn[standard]~=0.29"), "uvicorn");
        assert_eq!(package_base_name("colorama"), "colorama");
    }
}
