use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::protocol::SessionId;
use crate::session::ProbeEvent;
use crate::sink::TranscriptSink;

/// Appends every `report` payload to a markdown file, one section per event
pub struct ReportFileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ReportFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_section(&self, session_id: &SessionId, event: &ProbeEvent) -> io::Result<()> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut section = format!(
            "## {} at {}\n\n- session: `{}`\n- correlation: `{}`\n- fired: {}\n\n",
            event.probe_id,
            event.location,
            session_id,
            event.correlation_id,
            event.fired_at.to_rfc3339(),
        );
        for payload in &event.reports {
            let body = serde_json::to_string_pretty(payload).map_err(io::Error::other)?;
            section.push_str("```json\n");
            section.push_str(&body);
            section.push_str("\n```\n\n");
        }
        file.write_all(section.as_bytes())?;
        file.flush()
    }
}

impl TranscriptSink for ReportFileSink {
    fn on_resolved(&self, session_id: &SessionId, event: &ProbeEvent) {
        if event.reports.is_empty() {
            return;
        }
        if let Err(err) = self.write_section(session_id, event) {
            tracing::warn!(
                error = %err,
                path = %self.path.display(),
                probe_id = %event.probe_id,
                "failed to write probe report"
            );
        }
    }
}
