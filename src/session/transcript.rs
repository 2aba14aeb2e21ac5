//! Append-only transcript of probe events.
//!
//! Order is insertion order, which is firing order. Each event is mutated
//! exactly once, from `Pending` to a terminal status, through
//! [`Transcript::resolve`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{CorrelationId, Directive, DirectiveKind, PriorDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting for a directive
    Pending,
    /// Directive validated and applied
    Resolved,
    /// Directive refused (policy, decode or simulation failure); host got an abort
    Rejected,
    TimedOut,
    Cancelled,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Resolved => "resolved",
            EventStatus::Rejected => "rejected",
            EventStatus::TimedOut => "timed_out",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One probe firing and, once terminal, how it was resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeEvent {
    pub correlation_id: CorrelationId,
    pub probe_id: String,
    pub location: String,
    pub fired_at: DateTime<Utc>,
    /// Encoded context snapshot sent to the agent
    pub context: serde_json::Value,
    pub status: EventStatus,
    /// Directive as received from the agent, if one arrived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<Directive>,
    /// Kind the host actually acted on (`abort` for every fallback)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<DirectiveKind>,
    /// Human-readable explanation of the terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Side-channel observations recorded by `report` directives
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<serde_json::Value>,
    /// Encoded value the host went on with: the override, or its own computed result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ProbeEvent {
    pub fn pending(
        correlation_id: CorrelationId,
        probe_id: impl Into<String>,
        location: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            correlation_id,
            probe_id: probe_id.into(),
            location: location.into(),
            fired_at: Utc::now(),
            context,
            status: EventStatus::Pending,
            directive: None,
            applied: None,
            reason: None,
            reports: Vec::new(),
            outcome: None,
            resolved_at: None,
        }
    }

    pub fn prior_decision(&self) -> PriorDecision {
        PriorDecision {
            correlation_id: self.correlation_id.clone(),
            context: self.context.clone(),
            status: self.status,
            directive: self.directive.clone(),
            applied: self.applied,
            outcome: self.outcome.clone(),
        }
    }
}

/// Terminal outcome written into an event
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub status: EventStatus,
    pub directive: Option<Directive>,
    pub applied: Option<DirectiveKind>,
    pub reason: String,
    pub reports: Vec<serde_json::Value>,
    pub outcome: Option<serde_json::Value>,
}

impl Resolution {
    pub fn new(status: EventStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            directive: None,
            applied: None,
            reason: reason.into(),
            reports: Vec::new(),
            outcome: None,
        }
    }

    pub fn with_directive(mut self, directive: Directive) -> Self {
        self.directive = Some(directive);
        self
    }

    pub fn applied(mut self, kind: DirectiveKind) -> Self {
        self.applied = Some(kind);
        self
    }

    pub fn with_report(mut self, payload: serde_json::Value) -> Self {
        self.reports.push(payload);
        self
    }

    pub fn with_outcome(mut self, outcome: Option<serde_json::Value>) -> Self {
        self.outcome = outcome;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("transcript is closed")]
    Closed,

    #[error("no event with correlation id {0}")]
    NotFound(CorrelationId),

    #[error("event {id} already resolved as {status}")]
    AlreadyResolved {
        id: CorrelationId,
        status: EventStatus,
    },
}

#[derive(Default)]
struct TranscriptInner {
    events: Vec<ProbeEvent>,
    index: HashMap<CorrelationId, usize>,
    closed: bool,
}

/// Ordered, append-only record of one session's probe events
#[derive(Default)]
pub struct Transcript {
    inner: RwLock<TranscriptInner>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending event. Fails once the transcript is closed.
    pub fn append(&self, event: ProbeEvent) -> Result<(), TranscriptError> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(TranscriptError::Closed);
        }
        let idx = inner.events.len();
        inner.index.insert(event.correlation_id.clone(), idx);
        inner.events.push(event);
        Ok(())
    }

    /// Move a pending event to its terminal state. At most once per event.
    pub fn resolve(
        &self,
        id: &CorrelationId,
        resolution: Resolution,
    ) -> Result<ProbeEvent, TranscriptError> {
        let mut inner = self.inner.write();
        let idx = *inner
            .index
            .get(id)
            .ok_or_else(|| TranscriptError::NotFound(id.clone()))?;
        let event = &mut inner.events[idx];
        if event.status.is_terminal() {
            return Err(TranscriptError::AlreadyResolved {
                id: id.clone(),
                status: event.status,
            });
        }
        event.status = resolution.status;
        event.directive = resolution.directive;
        event.applied = resolution.applied;
        event.reason = Some(resolution.reason);
        event.reports.extend(resolution.reports);
        event.outcome = resolution.outcome;
        event.resolved_at = Some(Utc::now());
        Ok(event.clone())
    }

    /// Refuse further appends and cancel every pending event.
    ///
    /// Returns the cancelled events in firing order. A second call is a no-op.
    pub fn close(&self, reason: &str) -> Vec<ProbeEvent> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Vec::new();
        }
        inner.closed = true;
        let now = Utc::now();
        let mut cancelled = Vec::new();
        for event in inner.events.iter_mut() {
            if event.status == EventStatus::Pending {
                event.status = EventStatus::Cancelled;
                event.applied = Some(DirectiveKind::Abort);
                event.reason = Some(reason.to_string());
                event.resolved_at = Some(now);
                cancelled.push(event.clone());
            }
        }
        cancelled
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    pub fn get(&self, id: &CorrelationId) -> Option<ProbeEvent> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&idx| inner.events[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    /// Correlation ids of events still awaiting a directive
    pub fn pending(&self) -> Vec<CorrelationId> {
        self.inner
            .read()
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Pending)
            .map(|e| e.correlation_id.clone())
            .collect()
    }

    /// Settled firings of `probe_id` recorded before `before`, oldest first.
    ///
    /// Keeps only the most recent `limit` entries.
    pub fn history(
        &self,
        probe_id: &str,
        before: &CorrelationId,
        limit: usize,
    ) -> Vec<PriorDecision> {
        let inner = self.inner.read();
        let end = inner.index.get(before).copied().unwrap_or(inner.events.len());
        let mut prior: Vec<PriorDecision> = inner.events[..end]
            .iter()
            .rev()
            .filter(|e| e.probe_id == probe_id && e.status.is_terminal())
            .take(limit)
            .map(ProbeEvent::prior_decision)
            .collect();
        prior.reverse();
        prior
    }

    /// Lazy iterator over the events present right now
    pub fn iter(self: &Arc<Self>) -> TranscriptIter {
        TranscriptIter {
            transcript: self.clone(),
            cursor: 0,
            end: self.len(),
        }
    }

    /// Snapshot of every event in firing order
    pub fn export(&self) -> Vec<ProbeEvent> {
        self.inner.read().events.clone()
    }
}

/// Finite, restartable view over a transcript.
///
/// The end is fixed when the iterator is created; each step reads the
/// current state of the event under a short read lock, so it never blocks
/// writers for the whole traversal.
pub struct TranscriptIter {
    transcript: Arc<Transcript>,
    cursor: usize,
    end: usize,
}

impl TranscriptIter {
    /// Rewind to the first event, keeping the initial end
    pub fn restart(&mut self) {
        self.cursor = 0;
    }
}

impl Iterator for TranscriptIter {
    type Item = ProbeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        let event = self.transcript.inner.read().events.get(self.cursor).cloned();
        self.cursor += 1;
        event
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.cursor);
        (remaining, Some(remaining))
    }
}
