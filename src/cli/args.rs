//! Command line argument parsing and validation.

use crate::certs::CertificateBackend;
use crate::pipeline::{BuildRequest, CertSource, SignerKind};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Provision-build-sign pipeline for Python scripts
#[derive(Parser, Debug)]
#[command(
    name = "signforge",
    version,
    about = "Builds a Python script into a signed, distributable executable",
    long_about = "Turns a Python entry script into a distributable, Authenticode-signed \
executable by orchestrating external tools: PyInstaller for packaging, osslsigncode or the \
OS-native facility for signing, OpenSSL or the OS certificate subsystem for credentials.

Usage:
  signforge build --script main.py --name MyTool --cert-name Acme --password secret
  signforge certs create --name Acme --password secret --backend portable
  signforge sign --file builds/dist/MyTool.exe --pfx builds/certs/Acme.pfx --password secret

Exit code 0 = the promised artifact exists at the reported path."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Build root directory holding dist/, work/, spec/ and certs/
    #[arg(long, global = true, default_value = "builds", value_name = "DIR")]
    pub build_root: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full provision-build-sign-package pipeline
    Build(BuildArgs),
    /// Credential store operations
    Certs {
        #[command(subcommand)]
        command: CertsCommand,
    },
    /// Sign an existing executable
    Sign(SignArgs),
}

#[derive(ClapArgs, Debug)]
pub struct BuildArgs {
    /// Entry script to package
    #[arg(short, long, value_name = "FILE")]
    pub script: PathBuf,

    /// Application name
    #[arg(short, long, value_name = "NAME")]
    pub name: String,

    /// Icon for the produced executable
    #[arg(long, value_name = "FILE")]
    pub icon: Option<PathBuf>,

    /// Hide the console window of the packaged app
    #[arg(long)]
    pub windowed: bool,

    /// Produce a directory output instead of a single file
    #[arg(long)]
    pub onedir: bool,

    /// Auxiliary asset (file or directory); repeatable, order matters
    #[arg(long = "asset", value_name = "PATH")]
    pub assets: Vec<PathBuf>,

    /// Credential name for cache-or-create mode
    #[arg(long, value_name = "NAME", conflicts_with = "pfx")]
    pub cert_name: Option<String>,

    /// Externally supplied private container
    #[arg(long, value_name = "FILE")]
    pub pfx: Option<PathBuf>,

    /// Password for the private container
    #[arg(long, env = "SIGNFORGE_PASSWORD", value_name = "PASSWORD")]
    pub password: String,

    /// Backend used when a credential has to be created
    #[arg(long, value_enum, default_value = default_cert_backend())]
    pub cert_backend: CertBackendArg,

    /// Signing strategy
    #[arg(long, value_enum, default_value = "osslsigncode")]
    pub signer: SignerArg,
}

/// The native backend only exists on Windows hosts.
const fn default_cert_backend() -> &'static str {
    if cfg!(windows) { "native" } else { "portable" }
}

#[derive(Subcommand, Debug)]
pub enum CertsCommand {
    /// List credentials present in the store
    List,
    /// Create a credential pair without running a build
    Create {
        /// Logical credential name
        #[arg(long, value_name = "NAME")]
        name: String,
        /// Password protecting the private container
        #[arg(long, env = "SIGNFORGE_PASSWORD", value_name = "PASSWORD")]
        password: String,
        /// Creation backend
        #[arg(long, value_enum, default_value = default_cert_backend())]
        backend: CertBackendArg,
    },
}

#[derive(ClapArgs, Debug)]
pub struct SignArgs {
    /// Executable to sign
    #[arg(long, value_name = "FILE")]
    pub file: PathBuf,

    /// Private container to sign with
    #[arg(long, value_name = "FILE")]
    pub pfx: PathBuf,

    /// Password for the private container
    #[arg(long, env = "SIGNFORGE_PASSWORD", value_name = "PASSWORD")]
    pub password: String,

    /// Signing strategy
    #[arg(long, value_enum, default_value_t = SignerArg::Osslsigncode)]
    pub signer: SignerArg,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum CertBackendArg {
    /// OS certificate subsystem
    Native,
    /// OpenSSL subprocess
    Portable,
}

impl From<CertBackendArg> for CertificateBackend {
    fn from(value: CertBackendArg) -> Self {
        match value {
            CertBackendArg::Native => CertificateBackend::Native,
            CertBackendArg::Portable => CertificateBackend::Portable,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SignerArg {
    /// osslsigncode subprocess
    Osslsigncode,
    /// OS-native signing facility
    OsNative,
}

impl From<SignerArg> for SignerKind {
    fn from(value: SignerArg) -> Self {
        match value {
            SignerArg::Osslsigncode => SignerKind::Osslsigncode,
            SignerArg::OsNative => SignerKind::OsNative,
        }
    }
}

impl BuildArgs {
    /// Converts CLI arguments into a pipeline request.
    pub fn into_request(self) -> Result<BuildRequest, String> {
        let cert_source = match (self.cert_name, self.pfx) {
            (Some(name), None) => CertSource::CacheOrCreate { name },
            (None, Some(pfx)) => CertSource::External { pfx },
            (None, None) => return Err("one of --cert-name or --pfx is required".to_string()),
            (Some(_), Some(_)) => unreachable!("clap enforces the conflict"),
        };

        Ok(BuildRequest {
            script: self.script,
            app_name: self.name,
            icon: self.icon,
            console: !self.windowed,
            one_file: !self.onedir,
            assets: self.assets,
            cert_source,
            cert_password: self.password,
            cert_backend: self.cert_backend.into(),
            signer: self.signer.into(),
        })
    }
}
