//! Environment provisioning.
//!
//! Two concerns: external tool binaries ([`tools::ToolProvisioner`]) and
//! script-level dependencies ([`deps::DependencyInstaller`]). Both lean on
//! the network guard for anything that touches the wire.

pub mod deps;
pub mod tools;

pub use deps::DependencyInstaller;
pub use tools::{ToolDescriptor, ToolProvisioner};
