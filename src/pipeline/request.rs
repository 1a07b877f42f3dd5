//! Pipeline input and output types.

use crate::certs::CertificateBackend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the signing credential comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertSource {
    /// Look up the store by name, creating the pair on a miss
    CacheOrCreate {
        /// Logical credential name
        name: String,
    },
    /// Use an externally supplied private container
    External {
        /// Path to the caller's pfx file
        pfx: PathBuf,
    },
}

/// Which signing strategy the pipeline should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignerKind {
    /// osslsigncode subprocess (system install or provisioned copy)
    Osslsigncode,
    /// OS-native signing facility
    OsNative,
}

/// One pipeline invocation, immutable during the run.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Entry script to package
    pub script: PathBuf,
    /// Application name; a typed `.exe` suffix is tolerated and stripped
    pub app_name: String,
    /// Optional icon for the produced executable
    pub icon: Option<PathBuf>,
    /// Whether the packaged app keeps a console window
    pub console: bool,
    /// Single-file output versus directory output
    pub one_file: bool,
    /// Ordered auxiliary asset paths (files or directories)
    pub assets: Vec<PathBuf>,
    /// Credential selection mode
    pub cert_source: CertSource,
    /// Password protecting (or unlocking) the private container
    pub cert_password: String,
    /// Backend used when a credential has to be created
    pub cert_backend: CertificateBackend,
    /// Signing strategy
    pub signer: SignerKind,
}

/// Terminal value returned to the caller; never persisted.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Absolute path of the signed artifact
    pub artifact: PathBuf,
    /// Private container used for signing
    pub pfx: PathBuf,
    /// Public container shipped with the distribution, when available
    pub cer: Option<PathBuf>,
    /// Distribution directory handed to the end user
    pub dist_dir: PathBuf,
}
