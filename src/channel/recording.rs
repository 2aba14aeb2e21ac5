use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::contract::AgentChannel;
use crate::channel::error::ChannelError;
use crate::protocol::{AgentRequest, AgentResponse, CorrelationId};
use crate::sink::{now_ms, TapeEntry, TapeWriter};

/// Wraps a channel and records every exchange to a transcript tape
#[derive(Clone)]
pub struct RecordingAgentChannel {
    inner: Arc<dyn AgentChannel>,
    writer: Arc<TapeWriter>,
}

impl RecordingAgentChannel {
    pub fn new(inner: Arc<dyn AgentChannel>, writer: Arc<TapeWriter>) -> Self {
        Self { inner, writer }
    }

    fn record(&self, entry: TapeEntry) {
        if let Err(err) = self.writer.append(entry) {
            tracing::debug!(error = %err, "failed to append exchange to transcript tape");
        }
    }

    fn record_request(&self, request: &AgentRequest) {
        self.record(TapeEntry::Request {
            seq: self.writer.next_seq(),
            ts_ms: now_ms(),
            request: request.clone(),
        });
    }

    fn record_response(&self, probe_id: &str, response: &AgentResponse) {
        self.record(TapeEntry::Response {
            seq: self.writer.next_seq(),
            ts_ms: now_ms(),
            probe_id: probe_id.to_string(),
            response: response.clone(),
        });
    }

    fn record_failure(&self, correlation_id: &CorrelationId, probe_id: &str, error: &ChannelError) {
        self.record(TapeEntry::ChannelFailure {
            seq: self.writer.next_seq(),
            ts_ms: now_ms(),
            correlation_id: correlation_id.clone(),
            probe_id: probe_id.to_string(),
            error: error.to_string(),
        });
    }
}

#[async_trait]
impl AgentChannel for RecordingAgentChannel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, ChannelError> {
        let correlation_id = request.correlation_id.clone();
        let probe_id = request.probe_id.clone();
        self.record_request(&request);

        match self.inner.send(request).await {
            Ok(response) => {
                self.record_response(&probe_id, &response);
                Ok(response)
            }
            Err(err) => {
                self.record_failure(&correlation_id, &probe_id, &err);
                Err(err)
            }
        }
    }

    async fn cancel(&self, correlation_id: &CorrelationId) {
        self.record(TapeEntry::Note {
            seq: self.writer.next_seq(),
            ts_ms: now_ms(),
            message: format!("cancelled {correlation_id}"),
        });
        self.inner.cancel(correlation_id).await;
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
