//! Property-based tests for call-stack formatting and severity mapping

use fanlog_core::{format_call_stack, render_backtrace, Severity};
use proptest::prelude::*;

proptest! {
    /// Arbitrary input never panics, and excluded fragments never survive.
    #[test]
    fn prop_formatter_is_total(raw in "[ -~\n]{0,400}", frag in "[a-z/]{1,8}") {
        let stack = format_call_stack(&raw, &[frag.as_str()]);
        prop_assert!(stack.trace.iter().all(|line| !line.contains(frag.as_str())));
        if stack.trace.is_empty() {
            prop_assert!(stack.is_unknown());
        }
    }

    /// A well-formed top frame is always parsed back exactly.
    #[test]
    fn prop_well_formed_frame_round_trips(
        function in "[a-z_][a-z0-9_:]{0,20}",
        file in "/[a-z]{1,10}/[a-z]{1,10}\\.rs",
        line in 1u32..100_000,
        column in 1u32..200,
    ) {
        let raw = format!("Error: x\n    at {} ({}:{}:{})", function, file, line, column);
        let stack = format_call_stack(&raw, &["/node_modules/"]);

        prop_assert_eq!(stack.function, function);
        prop_assert_eq!(stack.file, file);
        prop_assert_eq!(stack.line, line);
        prop_assert_eq!(stack.trace.len(), 1);
    }

    #[test]
    fn prop_render_backtrace_is_total(text in "[ -~\n]{0,400}") {
        let rendered = render_backtrace(&text);
        prop_assert!(rendered.starts_with("Error: captured stack"));
    }

    #[test]
    fn prop_from_number_accepts_only_known_levels(n in any::<u8>()) {
        let known = Severity::ALL.iter().any(|level| level.as_number() == n);
        prop_assert_eq!(Severity::from_number(n).is_ok(), known);
    }
}
