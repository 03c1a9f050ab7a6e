//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep the thread. The chat runs on a
//! cooperative runtime; a sleeping thread stalls every stream on it.
//! **Required**: `tokio::time::sleep().await`, or better, wait on a channel.

use architectural_enforcement::{scan_production, Rule};

const RULES: &[Rule] = &[
    Rule {
        name: "Thread sleep",
        pattern: "thread::sleep",
        async_only: false,
    },
    Rule {
        name: "Blocking park",
        pattern: "thread::park",
        async_only: false,
    },
];

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_production(RULES);

    if !violations.is_empty() {
        eprintln!("\n❌ Thread sleeps found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use tokio::time::sleep().await or a channel instead.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}
