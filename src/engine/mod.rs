//! Probe interception: firing, suspension and directive application

mod call;
#[allow(clippy::module_inception)]
mod engine;
mod error;
mod outcome;

pub use call::{CallTimeout, ProbeCall};
pub(crate) use engine::EngineCore;
pub use engine::InterceptionEngine;
pub use error::InterceptError;
pub use outcome::{Abort, AbortCause, Branch, Flow, HostDirective, ProbeAbort};
