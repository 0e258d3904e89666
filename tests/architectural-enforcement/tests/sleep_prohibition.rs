//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the router crates MUST NOT call sleep
//! methods. Waiting happens on I/O, channels, `Notify` or
//! `tokio::time::interval`.
//! **Exceptions**: test modules.

use architectural_enforcement::{production_lines, rust_files, violation};

const SCANNED: [&str; 2] = ["router/core/src", "router/daemon/src"];

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for dir in SCANNED {
        for path in rust_files(dir) {
            for (line, code) in production_lines(&path) {
                if code.contains("::sleep(") || code.contains(".sleep(") {
                    violations.push(violation(&path, line, "Sleep call", &code));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for v in &violations {
            eprintln!("  {v}");
        }
        eprintln!("\nUse tokio::time::interval for periodic work and await I/O or channels otherwise.");
        panic!("Found {} sleep violation(s) in production code", violations.len());
    }
}
