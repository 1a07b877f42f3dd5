//! Pipeline orchestration and coordination.
//!
//! The pipeline is a linear sequence with two branch points: the credential
//! source (cache / create / externally supplied) and the build-argument
//! source (declarative config found among assets / assembled from request
//! fields). Data flows strictly forward; no component is re-entered once
//! passed, except the certificate store and the builder, which the
//! front-end may also invoke independently for ad-hoc operations.

pub mod layout;
pub mod orchestrator;
pub mod request;

pub use layout::Layout;
pub use orchestrator::Pipeline;
pub use request::{BuildRequest, CertSource, PipelineOutcome, SignerKind};
