//! Architectural Enforcement Integration Tests
//!
//! Source scans that keep the router honest:
//! - No sleep() calls in production code
//! - No blocking file or network I/O inside async functions
//! - The routing module stays synchronous and free of I/O
//! - The core crate keeps its public API documented
//!
//! Production code is everything in a file before its first
//! `#[cfg(test)]` line.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, resolved from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Every `.rs` file under `dir`, relative to the workspace root
///
/// Panics if the directory is missing so a moved crate cannot silently
/// pass the scan.
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    assert!(root.exists(), "scanned directory {} does not exist", root.display());

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Lines of a source file before its test module, comments stripped
///
/// Returns `(line_number, code)` pairs.
pub fn production_lines(path: &Path) -> Vec<(usize, String)> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            (idx + 1, code.to_string())
        })
        .collect()
}

/// Whether the nearest function header above `idx` is an `async fn`
pub fn in_async_fn(lines: &[(usize, String)], idx: usize) -> bool {
    for (_, line) in lines[..=idx].iter().rev() {
        let trimmed = line.trim_start();
        let header = trimmed
            .strip_prefix("pub(crate) ")
            .or_else(|| trimmed.strip_prefix("pub "))
            .unwrap_or(trimmed);

        if header.starts_with("async fn ") {
            return true;
        }
        if header.starts_with("fn ") {
            return false;
        }
    }
    false
}

/// Format a violation the way the scans report them
pub fn violation(path: &Path, line: usize, what: &str, code: &str) -> String {
    format!("{}:{} - {}: {}", path.display(), line, what, code.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<(usize, String)> {
        src.iter()
            .enumerate()
            .map(|(i, l)| (i + 1, (*l).to_string()))
            .collect()
    }

    #[test]
    fn test_async_fn_detection() {
        let code = lines(&[
            "pub async fn serve() {",
            "    fs::remove_file(path);",
            "}",
            "fn prepare() {",
            "    fs::remove_file(path);",
            "}",
        ]);
        assert!(in_async_fn(&code, 1));
        assert!(!in_async_fn(&code, 4));
    }

    #[test]
    fn test_workspace_root_has_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }
}
