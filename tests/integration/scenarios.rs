//! End-to-end probe scenarios
//!
//! Tests the flow: ProbeCall -> InterceptionEngine -> MockAgentChannel ->
//! HostDirective, and the transcript left behind.

use std::time::Duration;

use puppeteer::channel::{ChannelError, MockConfig, MockDirectiveBuilder};
use puppeteer::codec::{Shape, Value};
use puppeteer::engine::{AbortCause, HostDirective, InterceptError, ProbeCall};
use puppeteer::protocol::{Directive, DirectiveKind};
use puppeteer::session::{EventStatus, SessionState};
use serde_json::json;

use super::common::determinism::setup_deterministic_env;
use super::common::fixtures::mock_engine;

/// Scenario A: an override replaces the computed value
#[tokio::test]
async fn test_override_replaces_result() {
    setup_deterministic_env();
    let (engine, mock) =
        mock_engine(MockConfig::default().respond_to("p1", Directive::override_with(7)));
    let session = engine.open();

    let directive = session
        .fire(ProbeCall::new("p1").var("x", 5).expect(Shape::Int))
        .await;
    assert_eq!(directive, HostDirective::Override(Value::Int(7)));

    let request = mock.last_request().expect("agent saw the request");
    assert_eq!(request.probe_id, "p1");
    assert_eq!(request.context, json!({"x": 5}));
    assert_eq!(request.result_shape, Shape::Int);
    assert_eq!(
        request.allowed_directives.iter().copied().collect::<Vec<_>>(),
        vec![DirectiveKind::Continue, DirectiveKind::Override]
    );

    let events = session.export();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Resolved);
    assert_eq!(events[0].applied, Some(DirectiveKind::Override));
    assert_eq!(events[0].directive, Some(Directive::override_with(7)));
}

/// The agent sees the host's own result and how earlier firings of the probe settled
#[tokio::test]
async fn test_requests_carry_computed_value_and_probe_history() {
    let (engine, mock) = mock_engine(
        MockConfig::default()
            .respond_to("p1", Directive::override_with(7))
            .respond_to("p1", Directive::Continue),
    );
    let engine = engine.with_instructions(Some("keep lengths positive".into()));
    let session = engine.open();

    let first = session
        .fire(ProbeCall::new("p1").var("x", 5).computed(10).expect(Shape::Int))
        .await;
    assert_eq!(first, HostDirective::Override(Value::Int(7)));
    session.fire(ProbeCall::new("p2")).await;
    let second = session
        .fire(ProbeCall::new("p1").var("x", 6).computed(12).expect(Shape::Int))
        .await;
    assert_eq!(second, HostDirective::Continue);
    session.fire(ProbeCall::new("p1").var("x", 7)).await;

    let requests: Vec<_> = mock
        .captured_requests()
        .into_iter()
        .filter(|r| r.probe_id == "p1")
        .collect();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[0].computed, Some(json!(10)));
    assert_eq!(
        requests[0].instructions.as_deref(),
        Some("keep lengths positive")
    );

    assert_eq!(requests[1].computed, Some(json!(12)));
    assert_eq!(requests[1].history.len(), 1);
    assert_eq!(requests[1].history[0].context, json!({"x": 5}));
    assert_eq!(requests[1].history[0].applied, Some(DirectiveKind::Override));
    assert_eq!(requests[1].history[0].outcome, Some(json!(7)));

    let history = &requests[2].history;
    assert_eq!(requests[2].computed, None);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].applied, Some(DirectiveKind::Continue));
    assert_eq!(history[1].outcome, Some(json!(12)));

    let events = session.export();
    assert_eq!(events[0].outcome, Some(json!(7)));
    assert_eq!(events[2].outcome, Some(json!(12)));
}

/// Scenario B: a directive outside the policy is rejected with a deterministic abort
#[tokio::test]
async fn test_disallowed_directive_is_rejected() {
    let (engine, _mock) =
        mock_engine(MockConfig::default().respond_to("p2", Directive::abort("policy")));
    let session = engine.open();

    let directive = session.fire(ProbeCall::new("p2")).await;
    let abort = directive.abort().expect("rejections abort");
    assert_eq!(
        abort.cause,
        AbortCause::Runtime(InterceptError::PolicyViolation {
            probe_id: "p2".into(),
            kind: DirectiveKind::Abort,
        })
    );
    assert_ne!(abort.reason, "policy");
    assert!(abort.reason.starts_with("policy violation"));

    let event = &session.export()[0];
    assert_eq!(event.status, EventStatus::Rejected);
    assert_eq!(event.applied, Some(DirectiveKind::Abort));
    assert_eq!(event.reason.as_deref(), Some(abort.reason.as_str()));
}

/// Scenario C: a timeout aborts one call and leaves the session usable
#[tokio::test]
async fn test_timeout_aborts_and_session_stays_active() {
    let (engine, mock) = mock_engine(
        MockConfig::default()
            .hanging_on("p1")
            .respond_to("p3", Directive::Continue),
    );
    let session = engine.open();

    let timed_out = session
        .fire(ProbeCall::new("p1").timeout(Duration::from_millis(30)))
        .await;
    assert!(matches!(
        timed_out.abort().and_then(|a| a.error()),
        Some(InterceptError::TimedOut { after_ms: 30, .. })
    ));
    assert_eq!(session.export()[0].status, EventStatus::TimedOut);
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(mock.cancelled().len(), 1);

    let next = session.fire(ProbeCall::new("p3")).await;
    assert_eq!(next, HostDirective::Continue);
    assert_eq!(session.export()[1].status, EventStatus::Resolved);
}

/// Scenario D: closing the session cancels every outstanding wait
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_cancels_all_pending() {
    let (engine, mock) = mock_engine(MockConfig::default().hanging());
    let session = engine.open();

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.fire(ProbeCall::new("p1").no_timeout()).await }
    });
    let second = tokio::spawn({
        let session = session.clone();
        async move { session.fire(ProbeCall::new("p3").no_timeout()).await }
    });

    while session.pending().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(session.close(), 2);

    for handle in [first, second] {
        let directive = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("close unblocks the host path")
            .unwrap();
        assert!(matches!(
            directive.abort().and_then(|a| a.error()),
            Some(InterceptError::Cancelled(_))
        ));
    }

    assert_eq!(session.state(), SessionState::Closed);
    assert!(session
        .export()
        .iter()
        .all(|event| event.status == EventStatus::Cancelled));
    assert_eq!(mock.cancelled().len(), 2);
    assert_eq!(session.close(), 0);
}

#[tokio::test]
async fn test_unknown_probe_never_reaches_agent() {
    let (engine, mock) = mock_engine(MockConfig::default());
    let session = engine.open();

    let directive = session.fire(ProbeCall::new("nope").var("x", 1)).await;
    assert_eq!(
        directive.abort().and_then(|a| a.error()),
        Some(&InterceptError::UnknownProbe("nope".into()))
    );
    assert_eq!(mock.request_count(), 0);

    let event = &session.export()[0];
    assert_eq!(event.status, EventStatus::Rejected);
    assert_eq!(event.directive, None);
}

#[tokio::test]
async fn test_fire_after_close_appends_nothing() {
    let (engine, mock) = mock_engine(MockConfig::default());
    let session = engine.open();
    session.close();

    let directive = session.fire(ProbeCall::new("p1")).await;
    assert_eq!(
        directive.abort().and_then(|a| a.error()),
        Some(&InterceptError::SessionClosed)
    );
    assert!(session.export().is_empty());
    assert_eq!(mock.request_count(), 0);
}

#[tokio::test]
async fn test_override_with_wrong_shape_is_type_mismatch() {
    let (engine, _mock) =
        mock_engine(MockConfig::default().respond_to("p1", Directive::override_with("seven")));
    let session = engine.open();

    let directive = session
        .fire(ProbeCall::new("p1").var("x", 5).expect(Shape::Int))
        .await;
    assert!(matches!(
        directive.abort().and_then(|a| a.error()),
        Some(InterceptError::TypeMismatch { .. })
    ));
    assert_eq!(session.export()[0].status, EventStatus::Rejected);
}

#[tokio::test]
async fn test_integral_float_override_coerces_to_int() {
    let (engine, _mock) =
        mock_engine(MockConfig::default().respond_to("p1", Directive::override_with(7.0)));
    let session = engine.open();

    let directive = session.fire(ProbeCall::new("p1").expect(Shape::Int)).await;
    assert_eq!(directive, HostDirective::Override(Value::Int(7)));
}

#[tokio::test]
async fn test_simulate_offered_and_unsupported_branches() {
    let directives = MockDirectiveBuilder::new()
        .simulate(json!({"branch": "retry", "args": {"attempt": 2}}))
        .simulate(json!("teleport"))
        .build();
    let (engine, _mock) = mock_engine(MockConfig::default().with_sequence(directives));
    let session = engine.open();

    let offered = session
        .fire(ProbeCall::new("p3").branch("retry").branch("skip"))
        .await;
    match offered {
        HostDirective::Simulate(branch) => {
            assert_eq!(branch.name, "retry");
            assert_eq!(branch.args, Value::map([("attempt", 2)]));
        }
        other => panic!("expected simulate, got {other:?}"),
    }

    let unsupported = session.fire(ProbeCall::new("p3").branch("retry")).await;
    assert!(matches!(
        unsupported.abort().and_then(|a| a.error()),
        Some(InterceptError::UnsupportedSimulation { .. })
    ));

    let events = session.export();
    assert_eq!(events[0].status, EventStatus::Resolved);
    assert_eq!(events[1].status, EventStatus::Rejected);
}

#[tokio::test]
async fn test_report_records_payload_and_continues() {
    let (engine, _mock) = mock_engine(
        MockConfig::default().respond_to("p3", Directive::report(json!({"len": 3}))),
    );
    let session = engine.open();

    let directive = session.fire(ProbeCall::new("p3")).await;
    assert_eq!(directive, HostDirective::Continue);

    let event = &session.export()[0];
    assert_eq!(event.reports, vec![json!({"len": 3})]);
    assert_eq!(event.applied, Some(DirectiveKind::Continue));
}

#[tokio::test]
async fn test_agent_abort_is_catchable() {
    let (engine, _mock) =
        mock_engine(MockConfig::default().respond_to("p3", Directive::abort("bad input")));
    let session = engine.open();

    let flow = session.fire(ProbeCall::new("p3")).await.into_flow();
    let err = flow.unwrap_err();
    assert!(err.abort().is_agent());
    assert_eq!(err.abort().reason, "bad input");
}

#[tokio::test]
async fn test_channel_failure_resolves_rejected() {
    let (engine, _mock) = mock_engine(MockConfig::default().failing());
    let session = engine.open();

    let directive = session.fire(ProbeCall::new("p1")).await;
    assert!(matches!(
        directive.abort().and_then(|a| a.error()),
        Some(InterceptError::Channel(_))
    ));
    assert_eq!(session.export()[0].status, EventStatus::Rejected);
}

#[derive(Debug)]
struct Connection {
    port: u16,
}

#[tokio::test]
async fn test_opaque_handle_round_trips_through_override() {
    let (engine, mock) = mock_engine(MockConfig::default());
    let session = engine.open();
    let conn = Value::opaque(Connection { port: 5432 });

    session
        .fire(ProbeCall::new("p3").var("conn", conn.clone()))
        .await;
    let sent = mock.last_request().unwrap().context["conn"].clone();
    let token = sent["$opaque"]["token"].as_str().unwrap().to_string();

    let resolved = session.resolve_opaque(&token).expect("token is live");
    assert_eq!(resolved.downcast_ref::<Connection>().unwrap().port, 5432);
    assert_eq!(Value::Opaque(resolved), conn);

    // The agent hands the handle back as the override value
    mock.push_directive("p3", Directive::override_with(sent));
    let directive = session
        .fire(ProbeCall::new("p3").expect(Shape::Opaque))
        .await;
    assert_eq!(directive, HostDirective::Override(conn));

    let (engine, _mock) = mock_engine(MockConfig::default());
    let other_session = engine.open();
    assert!(other_session.resolve_opaque(&token).is_none());
}

#[test]
fn test_fire_blocking_from_host_thread() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let (engine, _mock) =
        mock_engine(MockConfig::default().respond_to("p1", Directive::override_with(11)));
    let session = engine.open_on(runtime.handle().clone());

    let host = std::thread::spawn(move || {
        session.fire_blocking(ProbeCall::new("p1").expect(Shape::Int))
    });
    assert_eq!(
        host.join().unwrap(),
        HostDirective::Override(Value::Int(11))
    );
}

#[test]
fn test_fire_blocking_without_runtime() {
    let (engine, _mock) = mock_engine(MockConfig::default());
    let session = engine.open();
    assert_eq!(
        session.fire_blocking(ProbeCall::new("p2")),
        HostDirective::Continue
    );
}

#[tokio::test]
async fn test_fire_blocking_inside_current_thread_runtime_aborts() {
    let (engine, mock) = mock_engine(MockConfig::default());
    let session = engine.open();

    let directive = session.fire_blocking(ProbeCall::new("p2"));
    assert!(matches!(
        directive.abort().and_then(|a| a.error()),
        Some(InterceptError::Channel(ChannelError::NotSupported(_)))
    ));
    assert!(session.export().is_empty());
    assert_eq!(mock.request_count(), 0);
    assert!(session.is_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fire_blocking_on_multi_thread_worker() {
    let (engine, _mock) =
        mock_engine(MockConfig::default().respond_to("p1", Directive::override_with(4)));
    let session = engine.open();

    assert_eq!(
        session.fire_blocking(ProbeCall::new("p1").expect(Shape::Int)),
        HostDirective::Override(Value::Int(4))
    );
}
