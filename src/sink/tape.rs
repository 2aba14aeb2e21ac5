use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::protocol::{AgentRequest, AgentResponse, CorrelationId, SessionId};
use crate::session::ProbeEvent;
use crate::sink::TranscriptSink;

pub const TRANSCRIPT_TAPE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TapeEntry {
    Request {
        seq: u64,
        ts_ms: u64,
        request: AgentRequest,
    },
    Response {
        seq: u64,
        ts_ms: u64,
        probe_id: String,
        response: AgentResponse,
    },
    ChannelFailure {
        seq: u64,
        ts_ms: u64,
        correlation_id: CorrelationId,
        probe_id: String,
        error: String,
    },
    Event {
        seq: u64,
        ts_ms: u64,
        session_id: SessionId,
        event: ProbeEvent,
    },
    Note {
        seq: u64,
        ts_ms: u64,
        message: String,
    },
}

impl TapeEntry {
    pub fn seq(&self) -> u64 {
        match self {
            TapeEntry::Request { seq, .. }
            | TapeEntry::Response { seq, .. }
            | TapeEntry::ChannelFailure { seq, .. }
            | TapeEntry::Event { seq, .. }
            | TapeEntry::Note { seq, .. } => *seq,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TapeJsonlLine {
    Header {
        schema_version: u32,
        created_at_ms: u64,
    },
    Entry {
        entry: TapeEntry,
    },
}

/// In-memory form of a JSONL transcript tape
#[derive(Debug, Clone)]
pub struct TranscriptTape {
    pub schema_version: u32,
    pub created_at_ms: u64,
    pub entries: Vec<TapeEntry>,
}

impl TranscriptTape {
    pub fn new() -> Self {
        Self {
            schema_version: TRANSCRIPT_TAPE_SCHEMA_VERSION,
            created_at_ms: now_ms(),
            entries: Vec::new(),
        }
    }

    pub fn write_jsonl_to_path(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let header = TapeJsonlLine::Header {
            schema_version: self.schema_version,
            created_at_ms: self.created_at_ms,
        };
        writeln!(
            writer,
            "{}",
            serde_json::to_string(&header).map_err(io::Error::other)?
        )?;
        for entry in &self.entries {
            let line = TapeJsonlLine::Entry {
                entry: entry.clone(),
            };
            writeln!(
                writer,
                "{}",
                serde_json::to_string(&line).map_err(io::Error::other)?
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_jsonl_from_path(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut schema_version: Option<u32> = None;
        let mut created_at_ms: Option<u64> = None;
        let mut entries = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: TapeJsonlLine = serde_json::from_str(&line)
                .map_err(|e| io::Error::other(format!("line {}: {e}", idx + 1)))?;
            match parsed {
                TapeJsonlLine::Header {
                    schema_version: v,
                    created_at_ms: t,
                } => {
                    if idx != 0 {
                        return Err(io::Error::other("tape header must be the first JSONL line"));
                    }
                    if v > TRANSCRIPT_TAPE_SCHEMA_VERSION {
                        return Err(io::Error::other(format!(
                            "unsupported tape schema version {v}"
                        )));
                    }
                    schema_version = Some(v);
                    created_at_ms = Some(t);
                }
                TapeJsonlLine::Entry { entry } => {
                    entries.push(entry);
                }
            }
        }

        let schema_version =
            schema_version.ok_or_else(|| io::Error::other("missing tape header"))?;
        let created_at_ms =
            created_at_ms.ok_or_else(|| io::Error::other("missing tape header timestamp"))?;

        Ok(Self {
            schema_version,
            created_at_ms,
            entries,
        })
    }

    /// Latest snapshot of every event on the tape, in firing order.
    ///
    /// Sinks may be notified out of order when probes fire concurrently, so
    /// tape position is not firing order. Sessions keep the order in which
    /// they first appear; events within a session are sorted by correlation
    /// sequence.
    pub fn events(&self) -> Vec<ProbeEvent> {
        let mut sessions: HashMap<SessionId, usize> = HashMap::new();
        let mut latest: HashMap<CorrelationId, (usize, ProbeEvent)> = HashMap::new();
        for entry in &self.entries {
            if let TapeEntry::Event {
                session_id, event, ..
            } = entry
            {
                let next = sessions.len();
                let rank = *sessions.entry(session_id.clone()).or_insert(next);
                latest.insert(event.correlation_id.clone(), (rank, event.clone()));
            }
        }

        let mut events: Vec<(usize, ProbeEvent)> = latest.into_values().collect();
        events.sort_by(|(a_rank, a), (b_rank, b)| {
            a_rank
                .cmp(b_rank)
                .then_with(|| a.correlation_id.seq().cmp(&b.correlation_id.seq()))
                .then_with(|| a.correlation_id.as_str().cmp(b.correlation_id.as_str()))
        });
        events.into_iter().map(|(_, event)| event).collect()
    }
}

impl Default for TranscriptTape {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends tape entries to a JSONL file as they happen
pub struct TapeWriter {
    schema_version: u32,
    created_at_ms: u64,
    seq: AtomicU64,
    writer: Mutex<BufWriter<File>>,
}

impl TapeWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let created_at_ms = now_ms();
        let header = TapeJsonlLine::Header {
            schema_version: TRANSCRIPT_TAPE_SCHEMA_VERSION,
            created_at_ms,
        };
        writeln!(
            writer,
            "{}",
            serde_json::to_string(&header).map_err(io::Error::other)?
        )?;
        writer.flush()?;
        Ok(Self {
            schema_version: TRANSCRIPT_TAPE_SCHEMA_VERSION,
            created_at_ms,
            seq: AtomicU64::new(1),
            writer: Mutex::new(writer),
        })
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn append(&self, entry: TapeEntry) -> io::Result<()> {
        let line = TapeJsonlLine::Entry { entry };
        let json = serde_json::to_string(&line).map_err(io::Error::other)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }

    pub fn note(&self, message: impl Into<String>) -> io::Result<()> {
        self.append(TapeEntry::Note {
            seq: self.next_seq(),
            ts_ms: now_ms(),
            message: message.into(),
        })
    }

    fn record_event(&self, session_id: &SessionId, event: &ProbeEvent) {
        let entry = TapeEntry::Event {
            seq: self.next_seq(),
            ts_ms: now_ms(),
            session_id: session_id.clone(),
            event: event.clone(),
        };
        if let Err(err) = self.append(entry) {
            tracing::debug!(error = %err, "failed to append probe event to transcript tape");
        }
    }
}

impl TranscriptSink for TapeWriter {
    fn on_fired(&self, session_id: &SessionId, event: &ProbeEvent) {
        self.record_event(session_id, event);
    }

    fn on_resolved(&self, session_id: &SessionId, event: &ProbeEvent) {
        self.record_event(session_id, event);
    }
}

pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
