//! Error types for the provision-build-sign pipeline.
//!
//! Low-level I/O and subprocess failures are re-classified into this
//! taxonomy at each component boundary before they reach the orchestrator.
//! Network trouble is never surfaced as fatal by itself: the wait/retry
//! layer only escapes through [`PipelineError::Cancelled`] or
//! [`PipelineError::RetriesExhausted`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for all pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A network wait was cancelled through its cancellation token
    #[error("operation cancelled while waiting for network")]
    Cancelled,

    /// A retryable operation failed on every allowed attempt
    #[error("network operation failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// How many attempts were made
        attempts: u32,
        /// Message of the final failure
        last_error: String,
    },

    /// A download could not be completed
    #[error("download of {url} failed: {reason}")]
    Download {
        /// Source URL
        url: String,
        /// Reason for the failure
        reason: String,
    },

    /// Downloaded content did not match the expected digest
    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Target path of the verified download
        path: PathBuf,
        /// Expected hex SHA-256
        expected: String,
        /// Computed hex SHA-256
        actual: String,
    },

    /// A required external tool could not be provisioned
    #[error("tool provisioning failed for '{tool}': {reason}")]
    ToolProvisioning {
        /// Logical tool name
        tool: String,
        /// Reason for the failure
        reason: String,
    },

    /// Script-level dependency installation failed
    #[error("dependency installation failed: {0}")]
    DependencyInstall(String),

    /// A caller-supplied credential container does not exist
    #[error("credential not found: {0}")]
    CredentialNotFound(PathBuf),

    /// A credential creation backend failed
    #[error("credential creation failed for '{name}': {reason}")]
    CredentialCreation {
        /// Logical credential name
        name: String,
        /// Reason for the failure
        reason: String,
    },

    /// The packaging tool exited with a non-zero status
    #[error("build tool exited with code {code:?}")]
    BuildToolNonZeroExit {
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Last captured lines of the tool log
        log_tail: Vec<String>,
    },

    /// The packaging tool reported success but no artifact was found
    #[error("build succeeded but no artifact was found at {0}")]
    ArtifactNotFound(PathBuf),

    /// The signing backend failed; the original artifact is untouched
    #[error("signing backend failed (exit code {code:?})")]
    SigningBackendFailure {
        /// Backend exit code
        code: Option<i32>,
        /// Captured stdout
        stdout: String,
        /// Captured stderr
        stderr: String,
    },

    /// The declarative build configuration could not be parsed
    #[error("invalid build configuration {path}: {reason}")]
    InvalidBuildConfig {
        /// Path of the rejected config file
        path: PathBuf,
        /// Reason for the rejection
        reason: String,
    },

    /// The requested entry script does not exist
    #[error("entry script not found: {0}")]
    ScriptNotFound(PathBuf),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether this error is worth retrying once connectivity returns.
    ///
    /// Drives the retry classification in `NetworkGuard::run_with_retry`:
    /// transport and download failures retry, everything else propagates
    /// immediately.
    pub fn is_network_related(&self) -> bool {
        match self {
            PipelineError::Http(_) | PipelineError::Download { .. } => true,
            PipelineError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::TimedOut
            ),
            // Batched installer output is matched by message since pip and
            // poetry do not expose a structured failure kind.
            PipelineError::DependencyInstall(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("connection") || msg.contains("timeout") || msg.contains("network")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        let err = PipelineError::Download {
            url: "https://example.invalid/tool.zip".into(),
            reason: "connection reset".into(),
        };
        assert!(err.is_network_related());
    }

    #[test]
    fn build_failures_are_not_retryable() {
        let err = PipelineError::BuildToolNonZeroExit {
            code: Some(1),
            log_tail: vec![],
        };
        assert!(!err.is_network_related());
    }

    #[test]
    fn installer_network_messages_are_retryable() {
        let err = PipelineError::DependencyInstall("Connection timed out".into());
        assert!(err.is_network_related());
        let err = PipelineError::DependencyInstall("no matching distribution".into());
        assert!(!err.is_network_related());
    }
}
