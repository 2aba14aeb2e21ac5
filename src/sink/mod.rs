//! Observers of probe events.
//!
//! Sinks are notified synchronously after the transcript has been updated.
//! They must not fail an interception: I/O problems are logged and dropped.

mod report;
mod tape;

pub use report::ReportFileSink;
pub use tape::{TapeEntry, TapeWriter, TranscriptTape, TRANSCRIPT_TAPE_SCHEMA_VERSION};

pub(crate) use tape::now_ms;

use crate::protocol::SessionId;
use crate::session::ProbeEvent;

pub trait TranscriptSink: Send + Sync {
    /// A probe fired and its pending event was appended
    fn on_fired(&self, _session_id: &SessionId, _event: &ProbeEvent) {}

    /// An event reached its terminal state
    fn on_resolved(&self, session_id: &SessionId, event: &ProbeEvent);
}
