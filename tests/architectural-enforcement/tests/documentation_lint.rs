//! Integration Test: Public API Stays Documented
//!
//! **Policy**: `router-core` denies `missing_docs` at the crate root, and no
//! module may opt out with an `allow`.

use std::fs;

use architectural_enforcement::{production_lines, rust_files, violation, workspace_root};

#[test]
fn test_core_denies_missing_docs() {
    let lib = workspace_root().join("router/core/src/lib.rs");
    let content = fs::read_to_string(&lib).expect("router-core lib.rs is readable");
    assert!(
        content.lines().any(|l| l.trim() == "#![deny(missing_docs)]"),
        "{} must carry #![deny(missing_docs)]",
        lib.display()
    );
}

#[test]
fn test_no_missing_docs_allowances() {
    let mut violations = Vec::new();
    for path in rust_files("router/core/src") {
        for (line, code) in production_lines(&path) {
            if code.contains("allow(missing_docs)") || code.contains("warn(missing_docs)") {
                violations.push(violation(&path, line, "Weakened doc lint", &code));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nPublic items in router-core must be documented:\n");
        for v in &violations {
            eprintln!("  {v}");
        }
        panic!("Found {} doc lint violation(s)", violations.len());
    }
}
