//! Human-readable, colorized stdout output.

use std::io::{self, Write};

use colored::{ColoredString, Colorize};

use crate::event::LogEvent;
use crate::level::Severity;

/// Writes one abbreviated line per event to stdout.
///
/// `HH:MM:SS.mmm LEVEL [category] message {context}`
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    colored: bool,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// No ANSI escapes, for pipes and tests.
    pub fn plain() -> Self {
        Self { colored: false }
    }

    /// Print the event. Write failures are swallowed.
    pub fn emit(&self, event: &LogEvent) {
        let line = self.format_line(event);
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", line);
    }

    pub fn format_line(&self, event: &LogEvent) -> String {
        let time = event.timestamp.format("%H:%M:%S%.3f");
        let level = format!("{:<5}", event.severity.as_str().to_uppercase());
        let category = format!("[{}]", event.category);

        let mut line = if self.colored {
            format!(
                "{} {} {} {}",
                time.to_string().dimmed(),
                paint(event.severity, level),
                category.cyan(),
                event.message
            )
        } else {
            format!("{} {} {} {}", time, level, category, event.message)
        };

        if let Some(context) = event.context.as_ref().filter(|c| !c.is_empty()) {
            let context = serde_json::Value::Object(context.clone()).to_string();
            line.push(' ');
            if self.colored {
                line.push_str(&context.dimmed().to_string());
            } else {
                line.push_str(&context);
            }
        }

        if let Some(stack) = event.call_stack.as_ref().filter(|s| !s.is_unknown()) {
            line.push_str(&format!(" ({}:{})", stack.file, stack.line));
        }

        for note in event.notes() {
            let note = format!(" !! {}", note);
            if self.colored {
                line.push_str(&note.yellow().to_string());
            } else {
                line.push_str(&note);
            }
        }
        line
    }
}

fn paint(severity: Severity, text: String) -> ColoredString {
    match severity {
        Severity::Trace => text.purple(),
        Severity::Debug => text.blue(),
        Severity::Info => text.green(),
        Severity::Warn => text.yellow(),
        Severity::Error => text.red(),
        Severity::Fatal => text.white().on_red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callstack::CallStack;
    use serde_json::json;

    #[test]
    fn test_plain_line() {
        let event = LogEvent::new(Severity::Warn, "pid", "http", "slow request")
            .with_context(json!({"ms": 1200}).as_object().cloned().unwrap());

        let line = ConsoleSink::plain().format_line(&event);

        assert!(line.contains("WARN  [http] slow request"));
        assert!(line.ends_with("{\"ms\":1200}"));
    }

    #[test]
    fn test_location_and_notes() {
        let event = LogEvent::new(Severity::Error, "pid", "system", "boom").with_call_stack(
            CallStack {
                file: "src/orders.rs".into(),
                line: 42,
                function: "create".into(),
                trace: vec![],
            },
        );
        event.add_note("database sink failed: locked");

        let line = ConsoleSink::plain().format_line(&event);

        assert!(line.contains("(src/orders.rs:42)"));
        assert!(line.ends_with("!! database sink failed: locked"));
    }
}
