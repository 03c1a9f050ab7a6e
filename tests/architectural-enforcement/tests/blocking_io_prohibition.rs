//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code MUST NOT use blocking I/O where the runtime
//! could be stalled. Reading the config file before the chat starts is fine;
//! doing the same inside an `async fn` is not.
//! **Required**: `reqwest::Client`, `tokio::io`, `tokio::fs`.

use architectural_enforcement::{production_sources, scan_production, Rule};

const RULES: &[Rule] = &[
    Rule {
        name: "Blocking HTTP client",
        pattern: "reqwest::blocking",
        async_only: false,
    },
    Rule {
        name: "Blocking network I/O",
        pattern: "std::net::",
        async_only: false,
    },
    Rule {
        name: "Blocking file I/O in async",
        pattern: "std::fs::",
        async_only: true,
    },
    Rule {
        name: "Blocking stdin in async",
        pattern: "std::io::stdin()",
        async_only: true,
    },
];

#[test]
fn test_production_sources_found() {
    let sources = production_sources();
    assert!(
        sources.iter().any(|p| p.ends_with("chat.rs")),
        "expected to scan the chat controller, found {sources:?}"
    );
}

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = scan_production(RULES);

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - reqwest::Client with .await");
        eprintln!("  - tokio::io::stdin() / tokio::io::stdout()");
        eprintln!("  - tokio::fs inside async functions");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}
