use thiserror::Error;

use crate::codec::Value;
use crate::engine::error::InterceptError;

/// Who decided to abort
#[derive(Debug, Clone, PartialEq)]
pub enum AbortCause {
    /// The agent issued `abort`
    Agent,
    /// The engine fell back to abort
    Runtime(InterceptError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Abort {
    pub reason: String,
    pub cause: AbortCause,
}

impl Abort {
    pub fn agent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            cause: AbortCause::Agent,
        }
    }

    pub fn runtime(error: InterceptError) -> Self {
        Self {
            reason: error.to_string(),
            cause: AbortCause::Runtime(error),
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self.cause, AbortCause::Agent)
    }

    pub fn error(&self) -> Option<&InterceptError> {
        match &self.cause {
            AbortCause::Agent => None,
            AbortCause::Runtime(err) => Some(err),
        }
    }
}

/// Alternate path the host agreed it can take
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub name: String,
    pub args: Value,
}

/// What the host program does next
#[derive(Debug, Clone, PartialEq)]
pub enum HostDirective {
    Continue,
    Override(Value),
    Abort(Abort),
    Simulate(Branch),
}

impl HostDirective {
    pub fn is_abort(&self) -> bool {
        matches!(self, HostDirective::Abort(_))
    }

    pub fn abort(&self) -> Option<&Abort> {
        match self {
            HostDirective::Abort(abort) => Some(abort),
            _ => None,
        }
    }

    /// Split aborts off as an error so hosts can unwind with `?`
    pub fn into_flow(self) -> Result<Flow, ProbeAbort> {
        match self {
            HostDirective::Continue => Ok(Flow::Continue),
            HostDirective::Override(value) => Ok(Flow::Override(value)),
            HostDirective::Simulate(branch) => Ok(Flow::Simulate(branch)),
            HostDirective::Abort(abort) => Err(ProbeAbort(abort)),
        }
    }
}

/// Non-aborting outcomes
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue,
    Override(Value),
    Simulate(Branch),
}

impl Flow {
    /// The overriding value, or `computed` when the agent let it stand
    pub fn value_or(self, computed: Value) -> Value {
        match self {
            Flow::Override(value) => value,
            _ => computed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("probe aborted: {}", .0.reason)]
pub struct ProbeAbort(pub Abort);

impl ProbeAbort {
    pub fn abort(&self) -> &Abort {
        &self.0
    }
}
