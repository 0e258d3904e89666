//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in the router crates MUST NOT use blocking
//! file or network I/O. Use `tokio::fs` and `tokio::net`.
//! **Acceptable**: non-async functions (config loading before the runtime,
//! socket preparation, PID files) and test modules.

use architectural_enforcement::{in_async_fn, production_lines, rust_files, violation};

const SCANNED: [&str; 2] = ["router/core/src", "router/daemon/src"];

fn is_blocking_fs(code: &str) -> bool {
    code.contains("fs::") && !code.contains("tokio::fs") && !code.contains("use ")
}

fn is_blocking_net(code: &str) -> bool {
    code.contains("std::net::")
        || code.contains("TcpStream::connect(")
        || code.contains("std::os::unix::net")
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();

    for dir in SCANNED {
        for path in rust_files(dir) {
            let lines = production_lines(&path);
            for (idx, (line, code)) in lines.iter().enumerate() {
                if !in_async_fn(&lines, idx) {
                    continue;
                }
                if is_blocking_fs(code) {
                    violations.push(violation(&path, *line, "Blocking file I/O", code));
                }
                if is_blocking_net(code) {
                    violations.push(violation(&path, *line, "Blocking network I/O", code));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found inside async functions:\n");
        for v in &violations {
            eprintln!("  {v}");
        }
        panic!("Found {} blocking I/O violation(s)", violations.len());
    }
}

#[test]
fn test_detectors() {
    assert!(is_blocking_fs("    fs::remove_file(&path)?;"));
    assert!(is_blocking_fs("    std::fs::write(&path, b\"x\")?;"));
    assert!(!is_blocking_fs("    tokio::fs::write(&tmp, &json).await"));
    assert!(!is_blocking_fs("use std::fs;"));
    assert!(is_blocking_net("let s = std::net::TcpStream::connect(addr)?;"));
    assert!(!is_blocking_net("let s = UnixStream::connect(&path).await?;"));
}
