//! Probe manifest: the TOML file produced alongside instrumented code.
//!
//! ```toml
//! [[probe]]
//! id = "list.len"
//! location = "src/list.rs:42"
//! allow = ["continue", "override"]
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::probe::registry::{Probe, ProbeRegistry, RegistryError};
use crate::protocol::DirectiveKind;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("probe {probe}: unknown directive kind '{name}'")]
    UnknownDirective { probe: String, name: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestProbe {
    pub id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeManifest {
    #[serde(default)]
    pub probe: Vec<ManifestProbe>,
}

impl ProbeManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(contents)?)
    }

    /// Convert entries to probes; any unknown directive name fails the whole manifest
    pub fn probes(&self) -> Result<Vec<Probe>, ManifestError> {
        self.probe
            .iter()
            .map(|entry| {
                let mut probe = Probe::new(entry.id.clone(), entry.location.clone());
                for name in &entry.allow {
                    let kind = DirectiveKind::parse(name).ok_or_else(|| {
                        ManifestError::UnknownDirective {
                            probe: entry.id.clone(),
                            name: name.clone(),
                        }
                    })?;
                    probe = probe.allow(kind);
                }
                Ok(probe)
            })
            .collect()
    }

    /// Build an open registry holding every probe, or nothing at all
    pub fn into_registry(self) -> Result<ProbeRegistry, ManifestError> {
        Ok(ProbeRegistry::from_probes(self.probes()?)?)
    }
}

impl ProbeRegistry {
    pub fn from_manifest(manifest: ProbeManifest) -> Result<Self, ManifestError> {
        manifest.into_registry()
    }
}
