use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use uuid::Uuid;

use crate::channel::{AgentChannel, CachingAgentChannel, RecordingAgentChannel};
use crate::codec::{Shape, StateCodec, Value};
use crate::config::{read_instructions, Config};
use crate::engine::call::ProbeCall;
use crate::engine::error::InterceptError;
use crate::engine::outcome::{Abort, Branch, HostDirective};
use crate::probe::{Probe, ProbeRegistry};
use crate::protocol::{
    AgentRequest, AgentResponse, CorrelationId, Directive, DirectiveKind, SessionId,
};
use crate::session::{
    EventStatus, ProbeEvent, Resolution, Session, SessionShared, TranscriptError,
};
use crate::sink::{ReportFileSink, TapeWriter, TranscriptSink};

/// Settled firings of the same probe sent along with each request
const HISTORY_LIMIT: usize = 16;

/// Everything a session needs from its engine
#[derive(Clone)]
pub(crate) struct EngineCore {
    registry: Arc<ProbeRegistry>,
    channel: Arc<dyn AgentChannel>,
    sinks: Vec<Arc<dyn TranscriptSink>>,
    default_timeout: Option<Duration>,
    instructions: Instructions,
}

/// Where operator instructions come from
#[derive(Clone, Default)]
enum Instructions {
    #[default]
    None,
    Fixed(String),
    /// Re-read on every firing so edits take effect without a restart
    File(PathBuf),
}

impl Instructions {
    fn current(&self) -> Option<String> {
        match self {
            Instructions::None => None,
            Instructions::Fixed(text) => Some(text.clone()),
            Instructions::File(path) => read_instructions(path),
        }
    }
}

/// Suspends probe call sites on an agent's decision.
///
/// Construction seals the registry; sessions opened from the engine share
/// its registry, channel and sinks.
pub struct InterceptionEngine {
    core: EngineCore,
}

impl InterceptionEngine {
    pub fn new(registry: Arc<ProbeRegistry>, channel: Arc<dyn AgentChannel>) -> Self {
        registry.seal();
        Self {
            core: EngineCore {
                registry,
                channel,
                sinks: Vec::new(),
                default_timeout: Config::default().default_timeout,
                instructions: Instructions::None,
            },
        }
    }

    /// Build an engine with caching, recording and reporting wired per `config`
    pub fn from_config(
        registry: Arc<ProbeRegistry>,
        channel: Arc<dyn AgentChannel>,
        config: &Config,
    ) -> std::io::Result<Self> {
        let mut channel = channel;
        let mut sinks: Vec<Arc<dyn TranscriptSink>> = Vec::new();

        if config.cache_enabled {
            channel = Arc::new(CachingAgentChannel::new(channel));
        }

        if config.transcript.record {
            let path = config
                .transcript
                .dir
                .join(format!("{}.jsonl", Uuid::now_v7()));
            let writer = Arc::new(TapeWriter::create(&path)?);
            tracing::info!(path = %path.display(), "recording transcript");
            channel = Arc::new(RecordingAgentChannel::new(channel, writer.clone()));
            sinks.push(writer);
        }

        if let Some(path) = &config.report_path {
            sinks.push(Arc::new(ReportFileSink::new(path)));
        }

        let mut engine = Self::new(registry, channel).with_default_timeout(config.default_timeout);
        if let Some(path) = &config.instructions_path {
            engine = engine.with_instructions_file(path.clone());
        }
        for sink in sinks {
            engine = engine.with_sink(sink);
        }
        Ok(engine)
    }

    pub fn with_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.core.sinks.push(sink);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.core.default_timeout = timeout;
        self
    }

    /// Operator instructions forwarded with every request
    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.core.instructions = instructions.map_or(Instructions::None, Instructions::Fixed);
        self
    }

    /// Forward the contents of `path` with every request, read at each firing
    pub fn with_instructions_file(mut self, path: PathBuf) -> Self {
        self.core.instructions = Instructions::File(path);
        self
    }

    pub fn registry(&self) -> &Arc<ProbeRegistry> {
        &self.core.registry
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.core.default_timeout
    }

    /// Open a session bound to the current tokio runtime, if there is one
    pub fn open(&self) -> Session {
        self.open_with(Handle::try_current().ok())
    }

    /// Open a session whose blocking calls run on `runtime`
    pub fn open_on(&self, runtime: Handle) -> Session {
        self.open_with(Some(runtime))
    }

    fn open_with(&self, runtime: Option<Handle>) -> Session {
        let session = Session::new(Arc::new(self.core.clone()), runtime);
        tracing::info!(
            session_id = %session.id(),
            probes = self.core.registry.len(),
            channel = self.core.channel.name(),
            "session opened"
        );
        session
    }
}

enum Waited {
    Answered(Result<AgentResponse, crate::channel::ChannelError>),
    TimedOut,
    Cancelled,
}

impl EngineCore {
    pub(crate) async fn intercept(&self, session: &SessionShared, call: ProbeCall) -> HostDirective {
        if session.transcript.is_closed() {
            return HostDirective::Abort(Abort::runtime(InterceptError::SessionClosed));
        }

        let correlation_id = session.next_correlation_id();
        let policy = self.registry.policy_for(&call.probe_id);
        let location = policy
            .as_ref()
            .map(|probe| probe.location.clone())
            .unwrap_or_default();
        let (context, computed) = StateCodec::new(&session.opaques).encode_firing(
            &correlation_id,
            &call.context,
            call.computed.as_ref(),
        );

        let event = ProbeEvent::pending(
            correlation_id.clone(),
            call.probe_id.clone(),
            location,
            context.clone(),
        );
        let fired_at = event.fired_at;
        if session.transcript.append(event.clone()).is_err() {
            return HostDirective::Abort(Abort::runtime(InterceptError::SessionClosed));
        }
        self.notify_fired(&session.id, &event);
        tracing::debug!(
            probe_id = %call.probe_id,
            correlation_id = %correlation_id,
            "probe fired"
        );

        let probe = match policy {
            Ok(probe) => probe,
            Err(_) => {
                let error = InterceptError::UnknownProbe(call.probe_id.clone());
                return self.reject(session, &correlation_id, &call.probe_id, None, error);
            }
        };

        let request = AgentRequest {
            correlation_id: correlation_id.clone(),
            session_id: session.id.clone(),
            probe_id: call.probe_id.clone(),
            location: probe.location.clone(),
            context,
            allowed_directives: probe.allowed_directives.clone(),
            result_shape: call.result_shape.clone(),
            branches: call.branches.clone(),
            instructions: self.instructions.current(),
            computed: computed.clone(),
            history: session
                .transcript
                .history(&call.probe_id, &correlation_id, HISTORY_LIMIT),
            fired_at,
        };

        let timeout = call.effective_timeout(self.default_timeout);
        let token = session.cancel.child_token();
        tracing::debug!(
            probe_id = %call.probe_id,
            correlation_id = %correlation_id,
            channel = self.channel.name(),
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "awaiting directive"
        );

        let waited = tokio::select! {
            biased;
            _ = token.cancelled() => Waited::Cancelled,
            answer = with_deadline(timeout, self.channel.send(request)) => match answer {
                Some(result) => Waited::Answered(result),
                None => Waited::TimedOut,
            },
        };

        match waited {
            Waited::Cancelled => {
                self.channel.cancel(&correlation_id).await;
                let error = InterceptError::Cancelled(call.probe_id.clone());
                let resolution = Resolution::new(EventStatus::Cancelled, "session closed")
                    .applied(DirectiveKind::Abort);
                self.finish(
                    session,
                    &correlation_id,
                    &call.probe_id,
                    resolution,
                    HostDirective::Abort(Abort::runtime(error)),
                )
            }
            Waited::TimedOut => {
                self.channel.cancel(&correlation_id).await;
                let error = InterceptError::TimedOut {
                    probe_id: call.probe_id.clone(),
                    after_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
                };
                tracing::warn!(
                    probe_id = %call.probe_id,
                    correlation_id = %correlation_id,
                    "probe timed out waiting for a directive"
                );
                let resolution = Resolution::new(EventStatus::TimedOut, error.to_string())
                    .applied(DirectiveKind::Abort);
                self.finish(
                    session,
                    &correlation_id,
                    &call.probe_id,
                    resolution,
                    HostDirective::Abort(Abort::runtime(error)),
                )
            }
            Waited::Answered(Err(err)) => {
                let error = InterceptError::Channel(err);
                self.reject(session, &correlation_id, &call.probe_id, None, error)
            }
            Waited::Answered(Ok(response)) if response.correlation_id != correlation_id => {
                let error = InterceptError::Channel(
                    crate::channel::ChannelError::UnknownCorrelation(
                        response.correlation_id.to_string(),
                    ),
                );
                self.reject(
                    session,
                    &correlation_id,
                    &call.probe_id,
                    Some(response.directive),
                    error,
                )
            }
            Waited::Answered(Ok(response)) => {
                self.apply(
                    session,
                    &probe,
                    &call,
                    &correlation_id,
                    computed,
                    response.directive,
                )
            }
        }
    }

    /// Validate a directive against the probe's policy and turn it into a host action
    fn apply(
        &self,
        session: &SessionShared,
        probe: &Probe,
        call: &ProbeCall,
        correlation_id: &CorrelationId,
        computed: Option<serde_json::Value>,
        directive: Directive,
    ) -> HostDirective {
        let kind = directive.kind();
        if !probe.permits(kind) {
            let error = InterceptError::PolicyViolation {
                probe_id: call.probe_id.clone(),
                kind,
            };
            return self.reject(session, correlation_id, &call.probe_id, Some(directive), error);
        }

        let codec = StateCodec::new(&session.opaques);
        let (resolution, host) = match &directive {
            Directive::Continue => (
                Resolution::new(EventStatus::Resolved, "agent continued")
                    .applied(DirectiveKind::Continue)
                    .with_outcome(computed),
                HostDirective::Continue,
            ),
            Directive::Override { value: raw } => match codec.decode(raw, &call.result_shape) {
                Ok(value) => (
                    Resolution::new(
                        EventStatus::Resolved,
                        format!("override applied ({})", value.type_name()),
                    )
                    .applied(DirectiveKind::Override)
                    .with_outcome(Some(raw.clone())),
                    HostDirective::Override(value),
                ),
                Err(error) => {
                    let error = InterceptError::TypeMismatch {
                        probe_id: call.probe_id.clone(),
                        error,
                    };
                    return self.reject(
                        session,
                        correlation_id,
                        &call.probe_id,
                        Some(directive.clone()),
                        error,
                    );
                }
            },
            Directive::Abort { reason } => (
                Resolution::new(EventStatus::Resolved, format!("agent aborted: {reason}"))
                    .applied(DirectiveKind::Abort),
                HostDirective::Abort(Abort::agent(reason.clone())),
            ),
            Directive::Simulate { branch } => match parse_branch(&codec, branch, &call.branches) {
                Ok(branch) => (
                    Resolution::new(
                        EventStatus::Resolved,
                        format!("simulating branch '{}'", branch.name),
                    )
                    .applied(DirectiveKind::Simulate),
                    HostDirective::Simulate(branch),
                ),
                Err(branch) => {
                    let error = InterceptError::UnsupportedSimulation {
                        probe_id: call.probe_id.clone(),
                        branch,
                    };
                    return self.reject(
                        session,
                        correlation_id,
                        &call.probe_id,
                        Some(directive.clone()),
                        error,
                    );
                }
            },
            Directive::Report { payload } => (
                Resolution::new(EventStatus::Resolved, "report recorded")
                    .applied(DirectiveKind::Continue)
                    .with_report(payload.clone())
                    .with_outcome(computed),
                HostDirective::Continue,
            ),
        };

        self.finish(
            session,
            correlation_id,
            &call.probe_id,
            resolution.with_directive(directive),
            host,
        )
    }

    /// Resolve the event as rejected and hand the host a runtime abort
    fn reject(
        &self,
        session: &SessionShared,
        correlation_id: &CorrelationId,
        probe_id: &str,
        directive: Option<Directive>,
        error: InterceptError,
    ) -> HostDirective {
        tracing::warn!(
            probe_id = %probe_id,
            correlation_id = %correlation_id,
            error = %error,
            "directive rejected"
        );
        let abort = Abort::runtime(error);
        let mut resolution = Resolution::new(EventStatus::Rejected, abort.reason.clone())
            .applied(DirectiveKind::Abort);
        if let Some(directive) = directive {
            resolution = resolution.with_directive(directive);
        }
        self.finish(
            session,
            correlation_id,
            probe_id,
            resolution,
            HostDirective::Abort(abort),
        )
    }

    /// Record the terminal state; whatever the transcript holds decides the outcome
    fn finish(
        &self,
        session: &SessionShared,
        correlation_id: &CorrelationId,
        probe_id: &str,
        resolution: Resolution,
        host: HostDirective,
    ) -> HostDirective {
        match session.transcript.resolve(correlation_id, resolution) {
            Ok(event) => {
                tracing::debug!(
                    probe_id = %probe_id,
                    correlation_id = %correlation_id,
                    status = %event.status,
                    "probe resolved"
                );
                self.notify_resolved(&session.id, &event);
                host
            }
            Err(TranscriptError::AlreadyResolved {
                status: EventStatus::Cancelled,
                ..
            }) => HostDirective::Abort(Abort::runtime(InterceptError::Cancelled(
                probe_id.to_string(),
            ))),
            Err(err) => {
                tracing::warn!(
                    probe_id = %probe_id,
                    correlation_id = %correlation_id,
                    error = %err,
                    "late resolution discarded"
                );
                HostDirective::Abort(Abort::runtime(InterceptError::AlreadyResolved(
                    correlation_id.clone(),
                )))
            }
        }
    }

    fn notify_fired(&self, session_id: &SessionId, event: &ProbeEvent) {
        for sink in &self.sinks {
            sink.on_fired(session_id, event);
        }
    }

    pub(crate) fn notify_resolved(&self, session_id: &SessionId, event: &ProbeEvent) {
        for sink in &self.sinks {
            sink.on_resolved(session_id, event);
        }
    }
}

async fn with_deadline<F: Future>(timeout: Option<Duration>, future: F) -> Option<F::Output> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future).await.ok(),
        None => Some(future.await),
    }
}

/// Accepts `"name"` or `{"branch": "name", "args": ...}` naming a branch the host offered.
/// The error is a description of what was asked for.
fn parse_branch(
    codec: &StateCodec<'_>,
    raw: &serde_json::Value,
    supported: &[String],
) -> Result<Branch, String> {
    let (name, args) = match raw {
        serde_json::Value::String(name) => (name.clone(), Value::Null),
        serde_json::Value::Object(fields) => match fields.get("branch") {
            Some(serde_json::Value::String(name)) => {
                let args = match fields.get("args") {
                    Some(args) => codec
                        .decode(args, &Shape::Any)
                        .map_err(|err| format!("branch '{name}' ({err})"))?,
                    None => Value::Null,
                };
                (name.clone(), args)
            }
            _ => return Err(format!("malformed branch spec {raw}")),
        },
        _ => return Err(format!("malformed branch spec {raw}")),
    };

    if supported.iter().any(|offered| offered == &name) {
        Ok(Branch { name, args })
    } else {
        Err(format!("branch '{name}'"))
    }
}
