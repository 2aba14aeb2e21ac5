use std::collections::BTreeMap;
use std::time::Duration;

use crate::codec::{Shape, Value};

/// How long a single firing may wait for its directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallTimeout {
    /// Use the engine's default
    #[default]
    Default,
    After(Duration),
    /// Wait until the directive arrives or the session closes
    Never,
}

/// One probe firing as seen from the host program.
///
/// ```
/// use std::time::Duration;
/// use puppeteer::codec::Shape;
/// use puppeteer::engine::ProbeCall;
///
/// let call = ProbeCall::new("p1")
///     .var("x", 5)
///     .expect(Shape::Int)
///     .timeout(Duration::from_millis(200));
/// assert_eq!(call.context.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ProbeCall {
    pub probe_id: String,
    pub context: BTreeMap<String, Value>,
    /// Shape an override must conform to
    pub result_shape: Shape,
    /// Branch names the host can take on `simulate`
    pub branches: Vec<String>,
    /// Result the host already computed, shown to the agent as an example
    pub computed: Option<Value>,
    pub timeout: CallTimeout,
}

impl ProbeCall {
    pub fn new(probe_id: impl Into<String>) -> Self {
        Self {
            probe_id: probe_id.into(),
            context: BTreeMap::new(),
            result_shape: Shape::Any,
            branches: Vec::new(),
            computed: None,
            timeout: CallTimeout::Default,
        }
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(name.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: BTreeMap<String, Value>) -> Self {
        self.context.extend(context);
        self
    }

    pub fn expect(mut self, shape: Shape) -> Self {
        self.result_shape = shape;
        self
    }

    pub fn branch(mut self, name: impl Into<String>) -> Self {
        self.branches.push(name.into());
        self
    }

    /// Offer the value the call site produced on its own.
    ///
    /// It travels with the request and is recorded as the event's outcome
    /// when the agent lets the call continue.
    pub fn computed(mut self, value: impl Into<Value>) -> Self {
        self.computed = Some(value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = CallTimeout::After(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = CallTimeout::Never;
        self
    }

    pub(crate) fn effective_timeout(&self, default: Option<Duration>) -> Option<Duration> {
        match self.timeout {
            CallTimeout::Default => default,
            CallTimeout::After(timeout) => Some(timeout),
            CallTimeout::Never => None,
        }
    }
}
