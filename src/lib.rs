pub mod channel;
pub mod codec;
pub mod config;
pub mod engine;
pub mod probe;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod util;

pub use channel::{
    AgentChannel, CachingAgentChannel, ChannelError, MailboxAgent, MailboxChannel,
    MockAgentChannel, RecordingAgentChannel, ReplayAgentChannel,
};
pub use codec::{CodecError, Opaque, Shape, StateCodec, Value};
pub use config::{Config, ConfigError};
pub use engine::{
    Abort, AbortCause, Branch, Flow, HostDirective, InterceptError, InterceptionEngine,
    ProbeAbort, ProbeCall,
};
pub use probe::{Probe, ProbeManifest, ProbeRegistry, RegistryError};
pub use protocol::{
    AgentRequest, AgentResponse, CorrelationId, Directive, DirectiveKind, DirectiveSet, SessionId,
};
pub use session::{EventStatus, ProbeEvent, Session, SessionState, Transcript};
pub use sink::{ReportFileSink, TapeWriter, TranscriptSink, TranscriptTape};
