//! Registry and engine fixtures

use std::sync::Arc;

use puppeteer::channel::{AgentChannel, MockAgentChannel, MockConfig};
use puppeteer::probe::{Probe, ProbeRegistry};
use puppeteer::protocol::DirectiveKind;
use puppeteer::InterceptionEngine;

/// Registry with the probes used across scenarios
///
/// - `p1`: continue, override
/// - `p2`: continue
/// - `p3`: every directive kind
pub fn scenario_registry() -> Arc<ProbeRegistry> {
    let registry = ProbeRegistry::from_probes([
        Probe::new("p1", "app.rs:10")
            .allow(DirectiveKind::Continue)
            .allow(DirectiveKind::Override),
        Probe::new("p2", "app.rs:20").allow(DirectiveKind::Continue),
        Probe::new("p3", "app.rs:30").allow_all(DirectiveKind::ALL),
    ])
    .expect("scenario probes are unique");
    Arc::new(registry)
}

/// Engine over the scenario registry answering from a scripted mock
pub fn mock_engine(config: MockConfig) -> (InterceptionEngine, Arc<MockAgentChannel>) {
    let mock = Arc::new(MockAgentChannel::new().with_config(config));
    let channel: Arc<dyn AgentChannel> = mock.clone();
    let engine = InterceptionEngine::new(scenario_registry(), channel).with_default_timeout(None);
    (engine, mock)
}
