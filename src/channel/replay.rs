use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::contract::AgentChannel;
use crate::channel::error::ChannelError;
use crate::protocol::{AgentRequest, AgentResponse, Directive};
use crate::sink::{TapeEntry, TranscriptTape};

/// Answers requests from a recorded tape.
///
/// Directives are matched per probe id in recorded order. Tapes written by
/// a `RecordingAgentChannel` replay their responses; tapes holding only
/// transcript events replay the directive each event received.
pub struct ReplayAgentChannel {
    queues: Mutex<HashMap<String, VecDeque<Directive>>>,
}

impl ReplayAgentChannel {
    pub fn new(tape: &TranscriptTape) -> Self {
        let mut queues: HashMap<String, VecDeque<Directive>> = HashMap::new();
        for entry in &tape.entries {
            if let TapeEntry::Response {
                probe_id, response, ..
            } = entry
            {
                queues
                    .entry(probe_id.clone())
                    .or_default()
                    .push_back(response.directive.clone());
            }
        }

        if queues.is_empty() {
            for event in tape.events() {
                if let Some(directive) = event.directive {
                    queues
                        .entry(event.probe_id)
                        .or_default()
                        .push_back(directive);
                }
            }
        }

        Self {
            queues: Mutex::new(queues),
        }
    }

    /// Directives not yet replayed, across all probes
    pub fn remaining(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl AgentChannel for ReplayAgentChannel {
    fn name(&self) -> &str {
        "replay"
    }

    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, ChannelError> {
        let directive = self
            .queues
            .lock()
            .get_mut(&request.probe_id)
            .and_then(VecDeque::pop_front);

        match directive {
            Some(directive) => Ok(request.respond(directive)),
            None => Err(ChannelError::ReplayExhausted(request.probe_id)),
        }
    }
}
