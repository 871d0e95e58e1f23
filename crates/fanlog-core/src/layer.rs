//! `tracing` integration.
//!
//! [`FanoutLayer`] turns `tracing` events into log events and dispatches
//! them through a [`Logger`], so `tracing::info!` and friends reach the same
//! sinks as direct `Logger::log` calls. The event target becomes the
//! category and fields become the context.
//!
//! ```ignore
//! use tracing_subscriber::prelude::*;
//!
//! let subscriber = tracing_subscriber::registry()
//!     .with(FanoutLayer::new(logger.clone()))
//!     .with(tracing_subscriber::fmt::layer());
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```

use std::fmt::Write as FmtWrite;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::level::Severity;
use crate::logger::Logger;

/// Diagnostics from the pipeline itself use this target prefix and are not
/// fed back into it.
const OWN_TARGET: &str = "fanlog_core";

/// A tracing Layer that forwards events to a [`Logger`].
pub struct FanoutLayer {
    logger: Logger,
}

impl FanoutLayer {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl<S> Layer<S> for FanoutLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut visitor = JsonVisitor::new();
        event.record(&mut visitor);

        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<String> = scope.from_root().map(|span| span.name().to_string()).collect();
            if !spans.is_empty() {
                visitor
                    .fields
                    .insert("span".to_string(), Value::String(spans.join(" > ")));
            }
        }

        let context = (!visitor.fields.is_empty()).then_some(visitor.fields);
        let _ = self.logger.log(
            Severity::from(*metadata.level()),
            metadata.target(),
            visitor.message.unwrap_or_default(),
            context,
        );
    }
}

/// Visitor that extracts the message and fields from tracing events.
struct JsonVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: Map::new(),
        }
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);

        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.fields.insert(field.name().to_string(), Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields.insert(field.name().to_string(), Value::Number(n));
        }
    }

    // Same `{message}` object callers pass as `context.error`, plus the
    // `source()` chain, outermost first.
    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut error = Map::new();
        error.insert("message".to_string(), Value::String(value.to_string()));

        let sources: Vec<Value> = std::iter::successors(value.source(), |e| e.source())
            .map(|e| Value::String(e.to_string()))
            .collect();
        if !sources.is_empty() {
            error.insert("sources".to_string(), Value::Array(sources));
        }
        self.fields.insert(field.name().to_string(), Value::Object(error));
    }
}
