//! In-process mailbox channel.
//!
//! Requests are queued for an agent task to pick up; the agent answers by
//! correlation id through a [`MailboxResponder`]. Every outstanding request
//! owns a `oneshot` slot in the pending map, so a response can be delivered
//! at most once. This is also the seam where an external transport (HTTP,
//! local IPC) forwards requests and posts directives back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::channel::contract::AgentChannel;
use crate::channel::error::ChannelError;
use crate::protocol::{AgentRequest, AgentResponse, CorrelationId};

type PendingMap = Arc<Mutex<HashMap<CorrelationId, oneshot::Sender<AgentResponse>>>>;

/// Create a connected channel/agent pair
pub fn mailbox(capacity: usize) -> (MailboxChannel, MailboxAgent) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    (
        MailboxChannel {
            requests: tx,
            pending: pending.clone(),
        },
        MailboxAgent {
            requests: rx,
            responder: MailboxResponder { pending },
        },
    )
}

/// Engine side of the mailbox
pub struct MailboxChannel {
    requests: mpsc::Sender<AgentRequest>,
    pending: PendingMap,
}

impl MailboxChannel {
    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Removes the pending slot when the waiting `send` goes away for any reason
struct PendingGuard {
    pending: PendingMap,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.correlation_id);
    }
}

#[async_trait]
impl AgentChannel for MailboxChannel {
    fn name(&self) -> &str {
        "mailbox"
    }

    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, ChannelError> {
        let (tx, rx) = oneshot::channel();
        let correlation_id = request.correlation_id.clone();
        self.pending.lock().insert(correlation_id.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            correlation_id,
        };

        self.requests
            .send(request)
            .await
            .map_err(|_| ChannelError::Closed)?;

        rx.await.map_err(|_| ChannelError::Closed)
    }

    async fn cancel(&self, correlation_id: &CorrelationId) {
        if self.pending.lock().remove(correlation_id).is_some() {
            tracing::debug!(correlation_id = %correlation_id, "Mailbox request cancelled");
        }
    }

    fn is_available(&self) -> bool {
        !self.requests.is_closed()
    }
}

/// Agent side of the mailbox
pub struct MailboxAgent {
    requests: mpsc::Receiver<AgentRequest>,
    responder: MailboxResponder,
}

impl MailboxAgent {
    /// Next request from the engine; `None` once every channel handle is dropped
    pub async fn recv(&mut self) -> Option<AgentRequest> {
        self.requests.recv().await
    }

    pub fn responder(&self) -> MailboxResponder {
        self.responder.clone()
    }

    pub fn respond(&self, response: AgentResponse) -> Result<(), ChannelError> {
        self.responder.respond(response)
    }
}

/// Cloneable handle for posting directives back
#[derive(Clone)]
pub struct MailboxResponder {
    pending: PendingMap,
}

impl MailboxResponder {
    /// Deliver a response. Fails if nothing is waiting on its correlation id,
    /// including when the request was already answered, timed out or cancelled.
    pub fn respond(&self, response: AgentResponse) -> Result<(), ChannelError> {
        let slot = self.pending.lock().remove(&response.correlation_id);
        let Some(tx) = slot else {
            return Err(ChannelError::UnknownCorrelation(
                response.correlation_id.to_string(),
            ));
        };
        let correlation_id = response.correlation_id.clone();
        tx.send(response)
            .map_err(|_| ChannelError::UnknownCorrelation(correlation_id.to_string()))
    }
}
