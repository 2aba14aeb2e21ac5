use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::Shape;
use crate::protocol::directive::{Directive, DirectiveKind, DirectiveSet};
use crate::protocol::ids::{CorrelationId, SessionId};
use crate::session::EventStatus;

/// Request sent to the agent when a probe fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub correlation_id: CorrelationId,
    pub session_id: SessionId,
    pub probe_id: String,
    pub location: String,
    /// Encoded context snapshot (named mapping of variable -> value)
    pub context: serde_json::Value,
    pub allowed_directives: DirectiveSet,
    /// Shape an `override` value must decode to
    pub result_shape: Shape,
    /// Branches the host can realize for `simulate`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    /// Free-form operator instructions for the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Value the host computed at the call site; an example of a valid override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<serde_json::Value>,
    /// Earlier settled firings of the same probe in this session, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<PriorDecision>,
    pub fired_at: DateTime<Utc>,
}

/// How an earlier firing of the same probe settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorDecision {
    pub correlation_id: CorrelationId,
    pub context: serde_json::Value,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<Directive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<DirectiveKind>,
    /// Value the host went on with, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<serde_json::Value>,
}

impl AgentRequest {
    /// Build the response that answers this request
    pub fn respond(&self, directive: Directive) -> AgentResponse {
        AgentResponse {
            correlation_id: self.correlation_id.clone(),
            directive,
        }
    }
}

/// Agent answer for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub correlation_id: CorrelationId,
    pub directive: Directive,
}
