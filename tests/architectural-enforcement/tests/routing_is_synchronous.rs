//! Integration Test: Routing Stays Synchronous
//!
//! **Policy**: classification, tracking, selection and feedback are pure
//! in-memory computations. Nothing under `routing/` may be async, touch the
//! filesystem, depend on the runtime, or sleep. Durable state goes through
//! the persistence handle.

use architectural_enforcement::{production_lines, rust_files, violation};

const FORBIDDEN: [(&str, &str); 6] = [
    ("async fn", "Async function"),
    (".await", "Await point"),
    ("std::fs", "Filesystem access"),
    ("tokio::", "Runtime dependency"),
    ("thread::sleep", "Thread sleep"),
    ("std::net", "Network access"),
];

#[test]
fn test_routing_module_is_synchronous() {
    let files = rust_files("router/core/src/routing");
    assert!(
        files.iter().any(|p| p.ends_with("selector.rs")),
        "routing module layout changed"
    );

    let mut violations = Vec::new();
    for path in files {
        for (line, code) in production_lines(&path) {
            for (needle, what) in FORBIDDEN {
                if code.contains(needle) {
                    violations.push(violation(&path, line, what, &code));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nRouting code must stay synchronous and I/O free:\n");
        for v in &violations {
            eprintln!("  {v}");
        }
        panic!("Found {} routing violation(s)", violations.len());
    }
}
