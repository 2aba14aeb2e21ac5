use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{DirectiveKind, DirectiveSet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("probe already registered: {0}")]
    DuplicateProbe(String),

    #[error("unknown probe: {0}")]
    UnknownProbe(String),

    #[error("registry is sealed; cannot register {0}")]
    RegistrySealed(String),
}

/// Instrumentation point with its directive policy. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub id: String,
    pub location: String,
    pub allowed_directives: DirectiveSet,
}

impl Probe {
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            allowed_directives: DirectiveSet::new(),
        }
    }

    pub fn allow(mut self, kind: DirectiveKind) -> Self {
        self.allowed_directives.insert(kind);
        self
    }

    pub fn allow_all(mut self, kinds: impl IntoIterator<Item = DirectiveKind>) -> Self {
        self.allowed_directives.extend(kinds);
        self
    }

    pub fn permits(&self, kind: DirectiveKind) -> bool {
        self.allowed_directives.contains(&kind)
    }
}

#[derive(Default)]
struct RegistryInner {
    probes: HashMap<String, Arc<Probe>>,
    sealed: bool,
}

/// Known probes and their policies.
///
/// Writes are accepted only while the registry is open; the engine seals it
/// before the first probe can fire. Lookups are safe from any number of
/// suspended paths at once.
#[derive(Default)]
pub struct ProbeRegistry {
    inner: RwLock<RegistryInner>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an open registry from a full probe list, failing on the first duplicate
    pub fn from_probes(probes: impl IntoIterator<Item = Probe>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for probe in probes {
            registry.register(probe)?;
        }
        Ok(registry)
    }

    pub fn register(&self, probe: Probe) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if inner.sealed {
            return Err(RegistryError::RegistrySealed(probe.id));
        }
        if inner.probes.contains_key(&probe.id) {
            return Err(RegistryError::DuplicateProbe(probe.id));
        }
        tracing::debug!(probe_id = %probe.id, location = %probe.location, "Registered probe");
        inner.probes.insert(probe.id.clone(), Arc::new(probe));
        Ok(())
    }

    /// Close the registry for writes. Idempotent.
    pub fn seal(&self) {
        let mut inner = self.inner.write();
        if !inner.sealed {
            inner.sealed = true;
            tracing::debug!(probes = inner.probes.len(), "Probe registry sealed");
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.read().sealed
    }

    pub fn policy_for(&self, id: &str) -> Result<Arc<Probe>, RegistryError> {
        self.inner
            .read()
            .probes
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProbe(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.read().probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().probes.is_empty()
    }

    /// All probes sorted by id
    pub fn probes(&self) -> Vec<Arc<Probe>> {
        let mut probes: Vec<_> = self.inner.read().probes.values().cloned().collect();
        probes.sort_by(|a, b| a.id.cmp(&b.id));
        probes
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ProbeRegistry")
            .field("probes", &inner.probes.len())
            .field("sealed", &inner.sealed)
            .finish()
    }
}
