//! Sessions and their transcripts

#[allow(clippy::module_inception)]
mod session;
mod transcript;

pub use session::{Session, SessionState};
pub(crate) use session::SessionShared;
pub use transcript::{
    EventStatus, ProbeEvent, Resolution, Transcript, TranscriptError, TranscriptIter,
};
