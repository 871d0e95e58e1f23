//! The transient log event and its serialized forms.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::callstack::CallStack;
use crate::level::Severity;
use crate::sink::SinkId;

/// Caller-supplied key/value pairs.
pub type Context = Map<String, Value>;

/// One log call, shared by reference with every sink that receives it.
///
/// The public fields are fixed at creation. Delivery state and notes are
/// interior-mutable because scheduled sinks update them from other tasks.
#[derive(Debug)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub process_identity: String,
    pub category: String,
    pub message: String,
    pub context: Option<Context>,
    pub call_stack: Option<CallStack>,
    delivered: Mutex<BTreeSet<SinkId>>,
    notes: Mutex<Vec<String>>,
}

impl LogEvent {
    /// Create a new event stamped with the current time.
    pub fn new(
        severity: Severity,
        process_identity: impl Into<String>,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            process_identity: process_identity.into(),
            category: category.into(),
            message: message.into(),
            context: None,
            call_stack: None,
            delivered: Mutex::new(BTreeSet::new()),
            notes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_call_stack(mut self, call_stack: CallStack) -> Self {
        self.call_stack = Some(call_stack);
        self
    }

    /// Record `sink` as delivered. Returns `false` when it already was, in
    /// which case the caller must not invoke the sink.
    pub fn mark_delivered(&self, sink: SinkId) -> bool {
        self.delivered.lock().insert(sink)
    }

    pub fn is_delivered(&self, sink: SinkId) -> bool {
        self.delivered.lock().contains(&sink)
    }

    pub fn delivered(&self) -> Vec<SinkId> {
        self.delivered.lock().iter().copied().collect()
    }

    /// Attach a non-fatal failure summary.
    pub fn add_note(&self, note: impl Into<String>) {
        self.notes.lock().push(note.into());
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().clone()
    }

    /// The stack string a caller attached under `context.error.stack`.
    pub fn error_stack(context: &Context) -> Option<&str> {
        context.get("error")?.get("stack")?.as_str()
    }

    /// Snapshot without bookkeeping, in file-line field order.
    pub fn to_line(&self) -> EventLine<'_> {
        let notes = self.notes();
        EventLine {
            time: self
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            msg: &self.message,
            level: self.severity,
            category: &self.category,
            pid: &self.process_identity,
            context: self.context.as_ref(),
            call_stack: self.call_stack.as_ref(),
            notes: (!notes.is_empty()).then_some(notes),
        }
    }
}

/// Serialized view of an event: `{time, msg, ...rest}`, with the delivered
/// set left out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLine<'a> {
    pub time: String,
    pub msg: &'a str,
    pub level: Severity,
    pub category: &'a str,
    pub pid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<&'a Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_stack: Option<&'a CallStack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
}

impl EventLine<'_> {
    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
