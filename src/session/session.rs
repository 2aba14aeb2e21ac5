use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelError;
use crate::codec::{Opaque, OpaqueTable};
use crate::engine::{Abort, EngineCore, HostDirective, InterceptError, ProbeCall};
use crate::protocol::{CorrelationId, SessionId};
use crate::session::transcript::{ProbeEvent, Transcript, TranscriptIter};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Closed,
}

pub(crate) struct SessionShared {
    pub(crate) id: SessionId,
    pub(crate) core: Arc<EngineCore>,
    pub(crate) transcript: Arc<Transcript>,
    pub(crate) opaques: OpaqueTable,
    pub(crate) cancel: CancellationToken,
    seq: AtomicU64,
    runtime: Option<Handle>,
}

impl SessionShared {
    pub(crate) fn next_correlation_id(&self) -> CorrelationId {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        CorrelationId::new(&self.id, seq)
    }
}

/// Handle to one attached program's probe activity.
///
/// Cheap to clone; every clone refers to the same transcript, opaque table
/// and correlation-id namespace.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionShared>,
}

impl Session {
    pub(crate) fn new(core: Arc<EngineCore>, runtime: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(SessionShared {
                id: SessionId::new(),
                core,
                transcript: Arc::new(Transcript::new()),
                opaques: OpaqueTable::new(),
                cancel: CancellationToken::new(),
                seq: AtomicU64::new(1),
                runtime,
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn state(&self) -> SessionState {
        if self.inner.transcript.is_closed() {
            SessionState::Closed
        } else {
            SessionState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Fire a probe and wait for the directive the host must follow
    pub async fn fire(&self, call: ProbeCall) -> HostDirective {
        self.inner.core.intercept(&self.inner, call).await
    }

    /// Blocking form of [`Session::fire`] for synchronous host threads.
    ///
    /// On a multi-thread runtime worker the wait moves off the scheduler with
    /// `block_in_place`. Inside a current-thread runtime, including its
    /// blocking pool, the call cannot make progress and aborts with
    /// `ChannelError::NotSupported` without recording an event.
    pub fn fire_blocking(&self, call: ProbeCall) -> HostDirective {
        let probe_id = call.probe_id.clone();
        let in_runtime = Handle::try_current().ok();
        if let Some(current) = &in_runtime {
            if current.runtime_flavor() == RuntimeFlavor::CurrentThread {
                tracing::warn!(
                    probe_id = %probe_id,
                    "blocking fire refused inside a current-thread runtime"
                );
                return HostDirective::Abort(Abort::runtime(InterceptError::Channel(
                    ChannelError::NotSupported(
                        "fire_blocking inside a current-thread runtime".to_string(),
                    ),
                )));
            }
        }

        let session = self.clone();
        let fire = async move { session.fire(call).await };
        let wait = || match &self.inner.runtime {
            Some(handle) => match futures::executor::block_on(handle.spawn(fire)) {
                Ok(directive) => directive,
                Err(err) => {
                    tracing::warn!(probe_id = %probe_id, error = %err, "probe task did not complete");
                    HostDirective::Abort(Abort::runtime(InterceptError::Cancelled(probe_id)))
                }
            },
            None => match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(fire),
                Err(err) => HostDirective::Abort(Abort::runtime(InterceptError::Channel(
                    err.into(),
                ))),
            },
        };

        match in_runtime {
            Some(_) => tokio::task::block_in_place(wait),
            None => wait(),
        }
    }

    /// Close the session, cancelling every outstanding wait.
    ///
    /// Returns how many pending events were cancelled. Idempotent.
    pub fn close(&self) -> usize {
        let cancelled = self.inner.transcript.close("session closed");
        for event in &cancelled {
            self.inner.core.notify_resolved(&self.inner.id, event);
        }
        if !self.inner.cancel.is_cancelled() {
            tracing::info!(
                session_id = %self.inner.id,
                cancelled = cancelled.len(),
                events = self.inner.transcript.len(),
                "session closed"
            );
        }
        self.inner.cancel.cancel();
        cancelled.len()
    }

    /// Lazy, finite, restartable view of the transcript in firing order
    pub fn transcript(&self) -> TranscriptIter {
        self.inner.transcript.iter()
    }

    /// Snapshot of every event recorded so far
    pub fn export(&self) -> Vec<ProbeEvent> {
        self.inner.transcript.export()
    }

    pub fn event(&self, correlation_id: &CorrelationId) -> Option<ProbeEvent> {
        self.inner.transcript.get(correlation_id)
    }

    /// Correlation ids still awaiting a directive
    pub fn pending(&self) -> Vec<CorrelationId> {
        self.inner.transcript.pending()
    }

    /// Host object behind an opaque token minted by this session
    pub fn resolve_opaque(&self, token: &str) -> Option<Opaque> {
        self.inner.opaques.resolve(token)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("events", &self.inner.transcript.len())
            .finish()
    }
}
