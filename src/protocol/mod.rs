//! Message shapes exchanged with the agent.

pub mod directive;
pub mod ids;
pub mod message;

pub use directive::{Directive, DirectiveKind, DirectiveSet};
pub use ids::{CorrelationId, SessionId};
pub use message::{AgentRequest, AgentResponse, PriorDecision};
