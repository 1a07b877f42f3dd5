//! Provision-build-sign pipeline for turning a Python script into a
//! distributable, Authenticode-signed executable.
//!
//! The packaging and signing primitives are delegated to external tools;
//! this crate is the pipeline that provisions, coordinates and hardens
//! those tool invocations: network-resilient tool acquisition, credential
//! cache-or-create, build-argument resolution with path sanitization,
//! subprocess log capture and diagnosis, and atomic artifact finalization.
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod build;
pub mod certs;
pub mod cli;
pub mod error;
pub mod net;
pub mod package;
pub mod pipeline;
pub mod plan;
pub mod provision;
pub mod signing;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use pipeline::{BuildRequest, CertSource, Layout, Pipeline, PipelineOutcome, SignerKind};
