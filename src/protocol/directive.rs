use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of directive an agent may issue at a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    Continue,
    Override,
    Abort,
    Simulate,
    Report,
}

impl DirectiveKind {
    pub const ALL: [DirectiveKind; 5] = [
        DirectiveKind::Continue,
        DirectiveKind::Override,
        DirectiveKind::Abort,
        DirectiveKind::Simulate,
        DirectiveKind::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveKind::Continue => "continue",
            DirectiveKind::Override => "override",
            DirectiveKind::Abort => "abort",
            DirectiveKind::Simulate => "simulate",
            DirectiveKind::Report => "report",
        }
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Some(DirectiveKind::Continue),
            "override" => Some(DirectiveKind::Override),
            "abort" => Some(DirectiveKind::Abort),
            "simulate" => Some(DirectiveKind::Simulate),
            "report" => Some(DirectiveKind::Report),
            _ => None,
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirectiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown directive kind: {s}"))
    }
}

/// Set of directive kinds a probe permits
pub type DirectiveSet = BTreeSet<DirectiveKind>;

/// Agent decision for a fired probe, as carried on the wire.
///
/// Payloads stay in their serialized form until the engine has checked the
/// probe's policy; decoding happens only for permitted kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    /// Resume exactly as if no probe existed
    Continue,
    /// Resume using `value` in place of the computed result
    Override { value: serde_json::Value },
    /// Terminate forward progress on this path
    Abort { reason: String },
    /// Resume along an alternate path described by `branch`
    Simulate { branch: serde_json::Value },
    /// Record `payload` and continue
    Report { payload: serde_json::Value },
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Directive::Continue => DirectiveKind::Continue,
            Directive::Override { .. } => DirectiveKind::Override,
            Directive::Abort { .. } => DirectiveKind::Abort,
            Directive::Simulate { .. } => DirectiveKind::Simulate,
            Directive::Report { .. } => DirectiveKind::Report,
        }
    }

    pub fn override_with(value: impl Into<serde_json::Value>) -> Self {
        Directive::Override {
            value: value.into(),
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Directive::Abort {
            reason: reason.into(),
        }
    }

    pub fn simulate(branch: impl Into<serde_json::Value>) -> Self {
        Directive::Simulate {
            branch: branch.into(),
        }
    }

    pub fn report(payload: impl Into<serde_json::Value>) -> Self {
        Directive::Report {
            payload: payload.into(),
        }
    }
}
