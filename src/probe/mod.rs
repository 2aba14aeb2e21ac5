//! Probe registry and manifests.

pub mod manifest;
pub mod registry;

pub use manifest::{ManifestError, ProbeManifest};
pub use registry::{Probe, ProbeRegistry, RegistryError};
