use async_trait::async_trait;

use crate::channel::error::ChannelError;
use crate::protocol::{AgentRequest, AgentResponse, CorrelationId};

/// Opaque request/response transport to the decision-making agent.
///
/// The engine awaits `send` for exactly one response per request. To cancel,
/// it drops the `send` future and then calls `cancel`; implementations must
/// not produce any other side effect for a cancelled request.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Deliver a request and wait for the agent's response
    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, ChannelError>;

    /// Mark a pending request as cancelled
    async fn cancel(&self, _correlation_id: &CorrelationId) {}

    /// Whether the agent can currently be reached
    fn is_available(&self) -> bool {
        true
    }
}
