use thiserror::Error;

use crate::channel::ChannelError;
use crate::codec::CodecError;
use crate::protocol::{CorrelationId, DirectiveKind};

/// Why the engine, rather than the agent, aborted a probe
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterceptError {
    #[error("unknown probe '{0}'")]
    UnknownProbe(String),

    #[error("policy violation: directive '{kind}' is not permitted at probe '{probe_id}'")]
    PolicyViolation {
        probe_id: String,
        kind: DirectiveKind,
    },

    #[error("policy violation: override for probe '{probe_id}' rejected: {error}")]
    TypeMismatch { probe_id: String, error: CodecError },

    #[error("policy violation: probe '{probe_id}' cannot simulate {branch}")]
    UnsupportedSimulation { probe_id: String, branch: String },

    #[error("probe '{probe_id}' timed out after {after_ms} ms")]
    TimedOut { probe_id: String, after_ms: u64 },

    #[error("probe '{0}' cancelled: session closed")]
    Cancelled(String),

    #[error("session is closed")]
    SessionClosed,

    #[error("agent channel failed: {0}")]
    Channel(ChannelError),

    #[error("event {0} was already resolved")]
    AlreadyResolved(CorrelationId),
}
