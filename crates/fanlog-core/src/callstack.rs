//! Call-stack capture and formatting.
//!
//! Stacks are handled in one textual frame format:
//!
//! ```text
//! Error: something went wrong
//!     at handler::create_order (src/orders.rs:42:9)
//!     at src/main.rs:10:5
//! ```
//!
//! Stacks attached by callers (`context.error.stack`) are parsed as-is.
//! Synthesized stacks are captured with [`std::backtrace::Backtrace`] and
//! rendered into the same format first, so one parser serves both.

use std::backtrace::Backtrace;

use serde::{Deserialize, Serialize};

/// Frames that never point at application code: the runtime entry,
/// backtrace machinery, async executors, third-party crates and the
/// logging pipeline itself.
pub const RUNTIME_FRAMES: &[&str] = &[
    "/rustc/",
    "/.cargo/registry/",
    "std::backtrace",
    "std::rt::",
    "std::panic",
    "std::sys",
    "std::thread",
    "core::ops::function",
    "core::panic",
    "tokio::runtime",
    "tokio::task",
    "tracing_core::",
    "tracing_subscriber::",
    "__rust_",
    "__libc_start",
    "start_thread",
    "fanlog_core::",
    file!(),
];

const UNKNOWN: &str = "unknown";
const ANONYMOUS: &str = "<anonymous>";

/// The top application frame of a stack plus the filtered frame list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStack {
    pub file: String,
    pub line: u32,
    pub function: String,
    pub trace: Vec<String>,
}

impl CallStack {
    fn unknown(trace: Vec<String>) -> Self {
        Self {
            file: UNKNOWN.to_string(),
            line: 0,
            function: UNKNOWN.to_string(),
            trace,
        }
    }

    /// True when no frame could be attributed.
    pub fn is_unknown(&self) -> bool {
        self.file == UNKNOWN && self.function == UNKNOWN
    }
}

/// Exclusion list used when capturing stacks: [`RUNTIME_FRAMES`] plus any
/// extra fragments from configuration.
#[derive(Debug, Clone)]
pub struct StackFilter {
    excluded: Vec<String>,
}

impl Default for StackFilter {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl StackFilter {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut excluded: Vec<String> = RUNTIME_FRAMES.iter().map(|s| s.to_string()).collect();
        excluded.extend(extra.into_iter().map(Into::into));
        Self { excluded }
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Parse a stack supplied by the caller.
    pub fn parse(&self, raw: &str) -> CallStack {
        format_call_stack(raw, &self.excluded)
    }

    /// Capture the current stack and format it.
    pub fn capture(&self) -> CallStack {
        let backtrace = Backtrace::force_capture();
        let raw = render_backtrace(&backtrace.to_string());
        format_call_stack(&raw, &self.excluded)
    }
}

/// Turn a raw stack string into a [`CallStack`].
///
/// The first line is the message line and is skipped. Lines containing any
/// `excluded` fragment are dropped. The first surviving line supplies file,
/// line and function; all surviving lines form `trace`. Never fails: an
/// empty or unparseable stack yields `"unknown"` fields.
pub fn format_call_stack<S: AsRef<str>>(raw: &str, excluded: &[S]) -> CallStack {
    let trace: Vec<String> = raw
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !excluded.iter().any(|frag| line.contains(frag.as_ref())))
        .map(str::to_string)
        .collect();

    let Some(top) = trace.first() else {
        return CallStack::unknown(Vec::new());
    };

    match parse_frame(top) {
        Some((function, file, line)) => CallStack {
            file,
            line,
            function,
            trace,
        },
        None => CallStack::unknown(trace),
    }
}

/// Parse `at [FUNCTION] (FILE:LINE:COLUMN)` or `at FILE:LINE:COLUMN`.
fn parse_frame(frame: &str) -> Option<(String, String, u32)> {
    let rest = frame.trim().strip_prefix("at ")?.trim();

    let (function, location) = match rest.strip_suffix(')') {
        Some(inner) => {
            let (function, location) = inner.rsplit_once(" (")?;
            let function = function.trim();
            let function = if function.is_empty() { ANONYMOUS } else { function };
            (function.to_string(), location)
        }
        None => (ANONYMOUS.to_string(), rest),
    };

    // Split from the right so drive letters and `::` in paths survive.
    let mut parts = location.rsplitn(3, ':');
    let _column = parts.next()?;
    let line = parts.next()?;
    let file = parts.next().filter(|f| !f.is_empty())?;

    Some((function, file.to_string(), line.parse().unwrap_or(0)))
}

/// Convert the display form of a Rust backtrace into the `at` frame format.
///
/// ```text
///    3: orders::create
///              at ./src/orders.rs:42:9
/// ```
/// becomes `    at orders::create (./src/orders.rs:42:9)`. Inlined symbols,
/// printed without an index, become frames of their own. Frames without a
/// location get `unknown:0:0`.
pub fn render_backtrace(text: &str) -> String {
    let mut out = String::from("Error: captured stack");
    let mut pending: Option<String> = None;
    let mut in_frames = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(function) = pending.take() {
                out.push_str(&format!("\n    at {} ({})", function, location));
            }
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("note:") {
            continue;
        }
        let function = match trimmed.split_once(": ") {
            Some((index, function))
                if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) =>
            {
                in_frames = true;
                function
            }
            // Inlined symbols share their frame's index and print without one.
            _ if in_frames => trimmed,
            _ => continue,
        };
        if let Some(previous) = pending.replace(function.to_string()) {
            out.push_str(&format!("\n    at {} (unknown:0:0)", previous));
        }
    }
    if let Some(previous) = pending {
        out.push_str(&format!("\n    at {} (unknown:0:0)", previous));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_MODULES: &[&str] = &["/node_modules/"];

    #[test]
    fn test_filters_excluded_frames() {
        let raw = "Error: boom\n\
                   at Layer.handle (/app/node_modules/express/lib/router/layer.js:95:5)\n\
                   at next (/app/node_modules/express/lib/router/route.js:137:13)\n\
                   at createOrder (/app/src/orders.js:42:9)";

        let stack = format_call_stack(raw, NODE_MODULES);

        assert_eq!(stack.function, "createOrder");
        assert_eq!(stack.file, "/app/src/orders.js");
        assert_eq!(stack.line, 42);
        assert_eq!(stack.trace, vec!["at createOrder (/app/src/orders.js:42:9)"]);
    }

    #[test]
    fn test_anonymous_function() {
        let raw = "Error\n    at /srv/app/main.rs:7:1";
        let stack = format_call_stack(raw, NODE_MODULES);

        assert_eq!(stack.function, "<anonymous>");
        assert_eq!(stack.file, "/srv/app/main.rs");
        assert_eq!(stack.line, 7);
    }

    #[test]
    fn test_everything_filtered_yields_unknown() {
        let raw = "Error\n    at x (/a/node_modules/b.js:1:1)";
        let stack = format_call_stack(raw, NODE_MODULES);

        assert!(stack.is_unknown());
        assert_eq!(stack.line, 0);
        assert!(stack.trace.is_empty());
    }

    #[test]
    fn test_malformed_top_frame_keeps_trace() {
        let raw = "Error\n    garbage line\n    at ok (/src/ok.rs:3:4)";
        let stack = format_call_stack(raw, NODE_MODULES);

        assert!(stack.is_unknown());
        assert_eq!(stack.trace.len(), 2);
    }

    #[test]
    fn test_bad_line_number_defaults_to_zero() {
        let raw = "Error\n    at run (/src/run.rs:abc:4)";
        let stack = format_call_stack(raw, NODE_MODULES);

        assert_eq!(stack.function, "run");
        assert_eq!(stack.line, 0);
    }

    #[test]
    fn test_empty_input() {
        let stack = format_call_stack("", NODE_MODULES);
        assert!(stack.is_unknown());
    }

    #[test]
    fn test_render_backtrace() {
        let text = "   0: std::backtrace::Backtrace::force_capture\n\
                    \x20            at /rustc/abc/library/std/src/backtrace.rs:331:13\n\
                    \x20  1: orders::create\n\
                    \x20            at ./src/orders.rs:42:9\n\
                    \x20  2: __libc_start_main\n";

        let rendered = render_backtrace(text);
        let lines: Vec<_> = rendered.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "    at orders::create (./src/orders.rs:42:9)");
        assert_eq!(lines[3], "    at __libc_start_main (unknown:0:0)");

        let stack = StackFilter::default().parse(&rendered);
        assert_eq!(stack.function, "orders::create");
        assert_eq!(stack.file, "./src/orders.rs");
        assert_eq!(stack.line, 42);
        assert_eq!(stack.trace.len(), 1);
    }

    #[test]
    fn test_render_backtrace_keeps_inlined_frames() {
        let text = "stack backtrace:\n\
                    \x20  1: app::inner\n\
                    \x20            at ./src/a.rs:10:5\n\
                    \x20     app::outer\n\
                    \x20            at ./src/a.rs:20:9\n\
                    \x20  2: app::main\n\
                    \x20            at ./src/main.rs:3:1\n";

        let stack = format_call_stack(&render_backtrace(text), NODE_MODULES);

        assert_eq!(
            stack.trace,
            vec![
                "at app::inner (./src/a.rs:10:5)",
                "at app::outer (./src/a.rs:20:9)",
                "at app::main (./src/main.rs:3:1)",
            ]
        );
        assert_eq!(stack.function, "app::inner");
    }

    #[test]
    fn test_capture_never_reports_pipeline_frames() {
        let stack = StackFilter::default().capture();
        assert!(stack
            .trace
            .iter()
            .all(|frame| !frame.contains("fanlog_core::")));
    }
}
