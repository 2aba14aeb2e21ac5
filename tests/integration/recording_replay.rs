//! Recording sessions to a tape and replaying them
//!
//! Tests the flow: engine built from Config -> RecordingAgentChannel + TapeWriter
//! -> JSONL tape -> ReplayAgentChannel reproduces the same host directives.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use puppeteer::channel::{AgentChannel, MockAgentChannel, MockConfig, ReplayAgentChannel};
use puppeteer::codec::{Shape, Value};
use puppeteer::config::Config;
use puppeteer::engine::{HostDirective, ProbeCall};
use puppeteer::protocol::{Directive, SessionId};
use puppeteer::session::{EventStatus, ProbeEvent};
use puppeteer::sink::{TapeEntry, TapeWriter, TranscriptSink, TranscriptTape};
use puppeteer::InterceptionEngine;
use serde_json::json;
use tempfile::tempdir;

use super::common::fixtures::scenario_registry;

fn recording_config(dir: &Path) -> Config {
    let mut config = Config::default().with_default_timeout(None);
    config.transcript.record = true;
    config.transcript.dir = dir.join("transcripts");
    config.report_path = Some(dir.join("report.md"));
    config
}

fn only_tape(dir: &Path) -> PathBuf {
    let mut tapes: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(tapes.len(), 1, "one tape per engine");
    tapes.remove(0)
}

fn workload() -> Vec<ProbeCall> {
    vec![
        ProbeCall::new("p1").var("x", 5).expect(Shape::Int),
        ProbeCall::new("p3").var("items", vec![1, 2, 3]),
        ProbeCall::new("p2"),
        ProbeCall::new("p1").var("x", 6).expect(Shape::Int),
    ]
}

fn scripted_agent() -> Arc<MockAgentChannel> {
    Arc::new(
        MockAgentChannel::new().with_config(
            MockConfig::default()
                .respond_to("p1", Directive::override_with(7))
                .respond_to("p1", Directive::override_with(8))
                .respond_to("p3", Directive::report(json!({"len": 3})))
                .respond_to("p2", Directive::abort("not allowed here")),
        ),
    )
}

#[tokio::test]
async fn test_recorded_session_replays_identically() {
    let dir = tempdir().unwrap();
    let config = recording_config(dir.path());
    let agent: Arc<dyn AgentChannel> = scripted_agent();
    let engine = InterceptionEngine::from_config(scenario_registry(), agent, &config).unwrap();

    let session = engine.open();
    let mut live = Vec::new();
    for call in workload() {
        live.push(session.fire(call).await);
    }
    session.close();

    assert_eq!(live[0], HostDirective::Override(Value::Int(7)));
    assert_eq!(live[1], HostDirective::Continue);
    assert!(live[2].is_abort());
    assert_eq!(live[3], HostDirective::Override(Value::Int(8)));

    let tape_path = only_tape(&config.transcript.dir);
    let tape = TranscriptTape::read_jsonl_from_path(&tape_path).unwrap();
    let recorded = tape.events();
    assert_eq!(recorded, session.export());
    assert_eq!(recorded[2].status, EventStatus::Rejected);
    assert_eq!(
        tape.entries
            .iter()
            .filter(|entry| matches!(entry, TapeEntry::Request { .. }))
            .count(),
        4
    );

    let replay: Arc<dyn AgentChannel> = Arc::new(ReplayAgentChannel::new(&tape));
    let replay_engine =
        InterceptionEngine::new(scenario_registry(), replay).with_default_timeout(None);
    let replay_session = replay_engine.open();
    let mut replayed = Vec::new();
    for call in workload() {
        replayed.push(replay_session.fire(call).await);
    }
    assert_eq!(replayed, live);

    let statuses: Vec<_> = replay_session.export().iter().map(|e| e.status).collect();
    let first_run: Vec<_> = recorded.iter().map(|e| e.status).collect();
    assert_eq!(statuses, first_run);
}

#[tokio::test]
async fn test_report_payloads_land_in_report_file() {
    let dir = tempdir().unwrap();
    let config = recording_config(dir.path());
    let agent: Arc<dyn AgentChannel> = scripted_agent();
    let engine = InterceptionEngine::from_config(scenario_registry(), agent, &config).unwrap();

    let session = engine.open();
    session.fire(ProbeCall::new("p3")).await;

    let report = std::fs::read_to_string(dir.path().join("report.md")).unwrap();
    assert!(report.contains("## p3 at app.rs:30"));
    assert!(report.contains("\"len\": 3"));
}

#[tokio::test]
async fn test_replay_exhaustion_aborts() {
    let tape = TranscriptTape::new();
    let replay: Arc<dyn AgentChannel> = Arc::new(ReplayAgentChannel::new(&tape));
    let engine = InterceptionEngine::new(scenario_registry(), replay);
    let session = engine.open();

    let directive = session.fire(ProbeCall::new("p1")).await;
    assert!(directive.is_abort());
    assert_eq!(session.export()[0].status, EventStatus::Rejected);
}

#[tokio::test]
async fn test_cache_answers_identical_firings() {
    let dir = tempdir().unwrap();
    let mut config = Config::default().with_default_timeout(None);
    config.cache_enabled = true;
    config.transcript.dir = dir.path().to_path_buf();

    let mock = Arc::new(
        MockAgentChannel::new()
            .with_config(MockConfig::default().otherwise(Directive::override_with(3))),
    );
    let agent: Arc<dyn AgentChannel> = mock.clone();
    let engine = InterceptionEngine::from_config(scenario_registry(), agent, &config).unwrap();
    let session = engine.open();

    for _ in 0..3 {
        let directive = session
            .fire(ProbeCall::new("p1").var("x", 5).expect(Shape::Int))
            .await;
        assert_eq!(directive, HostDirective::Override(Value::Int(3)));
    }
    assert_eq!(mock.request_count(), 1);
    assert_eq!(session.export().len(), 3);
}

#[tokio::test]
async fn test_instructions_reach_the_agent() {
    let dir = tempdir().unwrap();
    let instructions = dir.path().join("instructions.md");
    std::fs::write(&instructions, "Only override negative lengths.").unwrap();

    let mut config = Config::default();
    config.transcript.dir = dir.path().to_path_buf();
    config.instructions_path = Some(instructions);

    let mock = Arc::new(MockAgentChannel::new());
    let agent: Arc<dyn AgentChannel> = mock.clone();
    let engine = InterceptionEngine::from_config(scenario_registry(), agent, &config).unwrap();
    engine.open().fire(ProbeCall::new("p2")).await;

    assert_eq!(
        mock.last_request().unwrap().instructions.as_deref(),
        Some("Only override negative lengths.")
    );
}

/// Sink that stalls when one probe fires, letting later firings reach the tape first
struct StallOn {
    probe_id: &'static str,
    stall: Duration,
}

impl TranscriptSink for StallOn {
    fn on_fired(&self, _session_id: &SessionId, event: &ProbeEvent) {
        if event.probe_id == self.probe_id {
            std::thread::sleep(self.stall);
        }
    }

    fn on_resolved(&self, _session_id: &SessionId, _event: &ProbeEvent) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tape_keeps_firing_order_when_a_sink_stalls() {
    let dir = tempdir().unwrap();
    let tape_path = dir.path().join("tape.jsonl");
    let writer = Arc::new(TapeWriter::create(&tape_path).unwrap());
    let agent: Arc<dyn AgentChannel> = Arc::new(MockAgentChannel::new());
    let engine = InterceptionEngine::new(scenario_registry(), agent)
        .with_default_timeout(None)
        .with_sink(Arc::new(StallOn {
            probe_id: "p1",
            stall: Duration::from_millis(200),
        }))
        .with_sink(writer);
    let session = engine.open();

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.fire(ProbeCall::new("p1")).await }
    });
    while session.export().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(session.fire(ProbeCall::new("p2")).await, HostDirective::Continue);
    assert_eq!(first.await.unwrap(), HostDirective::Continue);

    let tape = TranscriptTape::read_jsonl_from_path(&tape_path).unwrap();
    let written_first = tape.entries.iter().find_map(|entry| match entry {
        TapeEntry::Event { event, .. } => Some(event.probe_id.clone()),
        _ => None,
    });
    assert_eq!(written_first.as_deref(), Some("p2"));

    let live: Vec<_> = session.export().into_iter().map(|e| e.probe_id).collect();
    let persisted: Vec<_> = tape.events().into_iter().map(|e| e.probe_id).collect();
    assert_eq!(live, vec!["p1", "p2"]);
    assert_eq!(persisted, live);
}

#[tokio::test]
async fn test_instruction_edits_reach_the_agent_and_reset_the_cache() {
    let dir = tempdir().unwrap();
    let instructions = dir.path().join("instructions.md");
    std::fs::write(&instructions, "be strict").unwrap();

    let mut config = Config::default().with_default_timeout(None);
    config.cache_enabled = true;
    config.transcript.dir = dir.path().to_path_buf();
    config.instructions_path = Some(instructions.clone());

    let mock = Arc::new(
        MockAgentChannel::new().with_config(
            MockConfig::default()
                .respond_to("p1", Directive::override_with(1))
                .respond_to("p1", Directive::override_with(2)),
        ),
    );
    let agent: Arc<dyn AgentChannel> = mock.clone();
    let engine = InterceptionEngine::from_config(scenario_registry(), agent, &config).unwrap();
    let session = engine.open();
    let call = || ProbeCall::new("p1").var("x", 5).expect(Shape::Int);

    assert_eq!(session.fire(call()).await, HostDirective::Override(Value::Int(1)));
    assert_eq!(session.fire(call()).await, HostDirective::Override(Value::Int(1)));
    assert_eq!(mock.request_count(), 1);

    std::fs::write(&instructions, "be lenient").unwrap();
    assert_eq!(session.fire(call()).await, HostDirective::Override(Value::Int(2)));
    assert_eq!(mock.request_count(), 2);
    assert_eq!(
        mock.last_request().unwrap().instructions.as_deref(),
        Some("be lenient")
    );
}
