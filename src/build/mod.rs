//! Packaging tool invocation and log capture.
//!
//! The builder always prefixes the caller's arguments with framework-owned
//! output-location overrides so downstream stages can find artifacts no
//! matter what the caller passed. Tool output is buffered in full for
//! failure diagnosis while a keyword-filtered subset is forwarded to the
//! log in real time.

use crate::error::{PipelineError, Result};
use crate::pipeline::layout::Layout;
use crate::plan::ResolvedBuildPlan;
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// How many trailing log lines are surfaced when the tool fails.
const LOG_TAIL_LINES: usize = 50;

/// Lines containing these markers are forwarded to the log in real time.
const SIGNAL_KEYWORDS: &[&str] = &["Error", "ERROR", "WARNING", "Building", "Copying", "Traceback"];

/// A produced, not-yet-signed executable.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    /// Absolute path of the produced binary
    pub path: PathBuf,
    /// Output name the artifact was located by
    pub app_name: String,
}

/// Wrapper around the external packaging tool (PyInstaller).
#[derive(Debug)]
pub struct Builder {
    layout: Layout,
    python: String,
}

impl Builder {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            python: if cfg!(windows) { "python" } else { "python3" }.to_string(),
        }
    }

    /// Overrides the interpreter used to launch the packaging tool.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Non-negotiable output-path overrides, always prefixed.
    fn framework_paths(&self) -> Result<Vec<String>> {
        Ok(vec![
            "--distpath".to_string(),
            self.layout.dist_dir().absolutize()?.display().to_string(),
            "--workpath".to_string(),
            self.layout.work_dir().absolutize()?.display().to_string(),
            "--specpath".to_string(),
            self.layout.spec_dir().absolutize()?.display().to_string(),
        ])
    }

    /// Runs the packaging tool against the resolved plan.
    ///
    /// On success the artifact is located at the enforced output path using
    /// the expected app name, with a fallback directory scan before the
    /// build is declared artifact-less. On non-zero exit the last captured
    /// lines ride along inside the error.
    pub async fn build(&self, plan: &ResolvedBuildPlan) -> Result<BuildArtifact> {
        self.layout.ensure().await?;

        let mut args = vec!["-m".to_string(), "PyInstaller".to_string()];
        args.extend(self.framework_paths()?);
        args.extend(plan.args.iter().cloned());

        log::info!("starting build for '{}'", plan.app_name);
        log::debug!("cwd: {:?}", plan.project_root);
        log::debug!("cmd: {} {}", self.python, args.join(" "));

        let mut command = tokio::process::Command::new(&self.python);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());
        if let Some(root) = &plan.project_root {
            command.current_dir(root);
        }

        let mut child = command.spawn()?;
        let captured = Arc::new(Mutex::new(Vec::<String>::new()));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = stream_lines(stdout, Arc::clone(&captured));
        let err_task = stream_lines(stderr, Arc::clone(&captured));
        let (status, _, _) = tokio::join!(child.wait(), out_task, err_task);
        let status = status?;

        let captured = Arc::try_unwrap(captured)
            .map(|m| m.into_inner().unwrap_or_default())
            .unwrap_or_default();

        if !status.success() {
            log::error!("build tool exited with {:?}", status.code());
            let tail_start = captured.len().saturating_sub(LOG_TAIL_LINES);
            let log_tail: Vec<String> = captured[tail_start..].to_vec();
            for line in &log_tail {
                log::error!("  > {}", line);
            }
            return Err(PipelineError::BuildToolNonZeroExit {
                code: status.code(),
                log_tail,
            });
        }

        let path = self.locate_artifact(&plan.app_name).await?;
        log::info!("build succeeded: {}", path.display());
        Ok(BuildArtifact {
            path,
            app_name: plan.app_name.clone(),
        })
    }

    /// Finds the produced binary under the enforced dist path.
    async fn locate_artifact(&self, app_name: &str) -> Result<PathBuf> {
        let dist = self.layout.dist_dir();
        let expected = dist.join(artifact_file_name(app_name));

        if tokio::fs::metadata(&expected)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Ok(expected.absolutize()?.into_owned());
        }

        // Onedir builds and renamed outputs: best-effort scan before failing.
        log::warn!(
            "expected artifact missing at {}, scanning dist directory",
            expected.display()
        );
        if let Some(found) = scan_for_artifact(&dist) {
            log::info!("found artifact via fallback scan: {}", found.display());
            return Ok(found.absolutize()?.into_owned());
        }

        Err(PipelineError::ArtifactNotFound(expected))
    }
}

fn stream_lines(
    reader: Option<impl AsyncRead + Unpin + Send + 'static>,
    captured: Arc<Mutex<Vec<String>>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(reader) = reader else { return };
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim_end().to_string();
            if line.is_empty() {
                continue;
            }
            if SIGNAL_KEYWORDS.iter().any(|k| line.contains(k)) {
                log::debug!("[packager] {}", line);
            }
            if let Ok(mut buffer) = captured.lock() {
                buffer.push(line);
            }
        }
    })
}

/// Expected artifact file name for the platform.
pub fn artifact_file_name(app_name: &str) -> String {
    if cfg!(windows) {
        format!("{app_name}.exe")
    } else {
        app_name.to_string()
    }
}

/// Scans the dist directory for any artifact of the expected kind.
fn scan_for_artifact(dist: &Path) -> Option<PathBuf> {
    walkdir::WalkDir::new(dist)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find(|e| is_executable_artifact(e.path()))
        .map(|e| e.into_path())
}

#[cfg(windows)]
fn is_executable_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("exe"))
}

#[cfg(not(windows))]
fn is_executable_artifact(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.extension().is_none()
        && std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_name_matches_platform_convention() {
        let name = artifact_file_name("MyTool");
        if cfg!(windows) {
            assert_eq!(name, "MyTool.exe");
        } else {
            assert_eq!(name, "MyTool");
        }
    }

    #[test]
    fn framework_paths_are_absolute_and_always_present() {
        let builder = Builder::new(Layout::new("builds"));
        let paths = builder.framework_paths().expect("framework paths");
        assert_eq!(paths.len(), 6);
        assert_eq!(paths[0], "--distpath");
        assert_eq!(paths[2], "--workpath");
        assert_eq!(paths[4], "--specpath");
        for value in [&paths[1], &paths[3], &paths[5]] {
            assert!(Path::new(value).is_absolute(), "{value} must be absolute");
        }
    }
}
