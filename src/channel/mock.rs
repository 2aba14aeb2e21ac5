//! Mock agent channel for deterministic testing
//!
//! Implements `AgentChannel` with scripted directives instead of a real
//! agent. Directives can be keyed per probe or consumed in sequence, and
//! every request and cancellation is captured for later assertions.
//!
//! # Example
//! ```no_run
//! use puppeteer::channel::mock::{MockAgentChannel, MockConfig};
//! use puppeteer::protocol::Directive;
//!
//! let channel = MockAgentChannel::new().with_config(
//!     MockConfig::default()
//!         .respond_to("p1", Directive::override_with(7))
//!         .otherwise(Directive::Continue),
//! );
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::contract::AgentChannel;
use crate::channel::error::ChannelError;
use crate::protocol::{AgentRequest, AgentResponse, CorrelationId, Directive};

/// Configuration for mock agent behavior
#[derive(Clone)]
pub struct MockConfig {
    /// Directives per probe id, consumed front to back
    pub by_probe: HashMap<String, VecDeque<Directive>>,
    /// Directives for any probe, consumed after the per-probe queue is empty
    pub sequence: VecDeque<Directive>,
    /// Directive used when every queue is empty
    pub fallback: Directive,
    /// Delay before every response
    pub delay: Duration,
    /// Extra delay for specific probes (simulates slow decisions)
    pub probe_delays: HashMap<String, Duration>,
    /// Never respond to these probes
    pub hang_on: Vec<String>,
    /// Never respond at all
    pub hang: bool,
    /// Error to return instead of a response
    pub fail_with: Option<ChannelError>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            by_probe: HashMap::new(),
            sequence: VecDeque::new(),
            fallback: Directive::Continue,
            delay: Duration::ZERO,
            probe_delays: HashMap::new(),
            hang_on: Vec::new(),
            hang: false,
            fail_with: None,
        }
    }
}

impl MockConfig {
    pub fn respond_to(mut self, probe_id: impl Into<String>, directive: Directive) -> Self {
        self.by_probe
            .entry(probe_id.into())
            .or_default()
            .push_back(directive);
        self
    }

    pub fn with_sequence(mut self, directives: Vec<Directive>) -> Self {
        self.sequence = directives.into();
        self
    }

    pub fn otherwise(mut self, directive: Directive) -> Self {
        self.fallback = directive;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_probe_delay(mut self, probe_id: impl Into<String>, delay: Duration) -> Self {
        self.probe_delays.insert(probe_id.into(), delay);
        self
    }

    /// Never answer requests for `probe_id`
    pub fn hanging_on(mut self, probe_id: impl Into<String>) -> Self {
        self.hang_on.push(probe_id.into());
        self
    }

    /// Never answer any request
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn failing(self) -> Self {
        self.failing_with(ChannelError::Unavailable("mock-failure".into()))
    }

    pub fn failing_with(mut self, error: ChannelError) -> Self {
        self.fail_with = Some(error);
        self
    }
}

/// Mock agent channel for testing
pub struct MockAgentChannel {
    config: Arc<Mutex<MockConfig>>,
    captured_requests: Arc<Mutex<Vec<AgentRequest>>>,
    cancelled: Arc<Mutex<Vec<CorrelationId>>>,
}

impl MockAgentChannel {
    pub fn new() -> Self {
        Self {
            config: Arc::new(Mutex::new(MockConfig::default())),
            captured_requests: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_config(self, config: MockConfig) -> Self {
        *self.config.lock() = config;
        self
    }

    /// Convenience: answer every request from `directives` in order
    pub fn with_directives(self, directives: Vec<Directive>) -> Self {
        self.config.lock().sequence = directives.into();
        self
    }

    /// Queue another directive for `probe_id` while the mock is in use
    pub fn push_directive(&self, probe_id: impl Into<String>, directive: Directive) {
        self.config
            .lock()
            .by_probe
            .entry(probe_id.into())
            .or_default()
            .push_back(directive);
    }

    pub fn captured_requests(&self) -> Vec<AgentRequest> {
        self.captured_requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<AgentRequest> {
        self.captured_requests.lock().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().len()
    }

    pub fn cancelled(&self) -> Vec<CorrelationId> {
        self.cancelled.lock().clone()
    }

    pub fn reset(&self) {
        self.captured_requests.lock().clear();
        self.cancelled.lock().clear();
    }

    fn next_directive(&self, probe_id: &str) -> Directive {
        let mut config = self.config.lock();
        if let Some(directive) = config
            .by_probe
            .get_mut(probe_id)
            .and_then(|queue| queue.pop_front())
        {
            return directive;
        }
        if let Some(directive) = config.sequence.pop_front() {
            return directive;
        }
        config.fallback.clone()
    }
}

impl Default for MockAgentChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentChannel for MockAgentChannel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, ChannelError> {
        self.captured_requests.lock().push(request.clone());

        let (delay, hang, fail_with) = {
            let config = self.config.lock();
            let delay = config.delay
                + config
                    .probe_delays
                    .get(&request.probe_id)
                    .copied()
                    .unwrap_or_default();
            let hang = config.hang || config.hang_on.contains(&request.probe_id);
            (delay, hang, config.fail_with.clone())
        };

        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(error) = fail_with {
            return Err(error);
        }

        let directive = self.next_directive(&request.probe_id);
        Ok(request.respond(directive))
    }

    async fn cancel(&self, correlation_id: &CorrelationId) {
        self.cancelled.lock().push(correlation_id.clone());
    }
}

/// Builder for directive sequences
pub struct MockDirectiveBuilder {
    directives: Vec<Directive>,
}

impl MockDirectiveBuilder {
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
        }
    }

    pub fn continue_(mut self) -> Self {
        self.directives.push(Directive::Continue);
        self
    }

    pub fn override_with(mut self, value: serde_json::Value) -> Self {
        self.directives.push(Directive::override_with(value));
        self
    }

    pub fn abort(mut self, reason: &str) -> Self {
        self.directives.push(Directive::abort(reason));
        self
    }

    pub fn simulate(mut self, branch: serde_json::Value) -> Self {
        self.directives.push(Directive::simulate(branch));
        self
    }

    pub fn report(mut self, payload: serde_json::Value) -> Self {
        self.directives.push(Directive::report(payload));
        self
    }

    pub fn build(self) -> Vec<Directive> {
        self.directives
    }
}

impl Default for MockDirectiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}
