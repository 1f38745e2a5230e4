//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code in the conductor and daemon MUST NOT block an
//! async executor thread.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::io::stdin`, not
//! `std::fs`, `std::net`, `std::io::stdin` inside async functions.

use std::fs;
use std::path::Path;

use architectural_enforcement::{
    code_part, is_in_async_function, is_in_non_async_function, is_in_test_code, rust_sources,
    workspace_root, PRODUCTION_DIRS,
};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O in async functions:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::process::Command::output()");
        eprintln!("  - std::io::stdin(), std::io::stdout()");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::OpenOptions");
        eprintln!("  - tokio::io::stdin() with AsyncBufReadExt::lines()");
        eprintln!("  - reqwest::Client::post().send().await");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (config loading before the runtime is busy)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_production_dirs_exist() {
    let root = workspace_root();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.is_dir(), "missing production dir {}", path.display());
        assert!(
            !rust_sources(&path).is_empty(),
            "no sources under {}",
            path.display()
        );
    }
}

/// Find all blocking I/O calls in production code
fn find_blocking_io_violations() -> Vec<String> {
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for file in rust_sources(&root.join(dir)) {
            check_file(&file, &mut violations);
        }
    }

    violations
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };
    let lines: Vec<&str> = content.lines().collect();
    violations.extend(scan_lines(&lines).into_iter().map(|(line_number, kind, line)| {
        format!("{}:{} - {}: {}", path.display(), line_number, kind, line.trim())
    }));
}

/// Scan source lines; returns (line number, violation kind, line)
fn scan_lines<'a>(lines: &[&'a str]) -> Vec<(usize, &'static str, &'a str)> {
    let mut found = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        if code.trim().is_empty() {
            continue;
        }

        // Skip test code
        if is_in_test_code(lines, idx) {
            continue;
        }

        // Blocking calls are fine in non-async functions
        if is_in_non_async_function(lines, idx) {
            continue;
        }

        let kind = if code.contains("std::fs::") || code.contains("use std::fs") {
            Some("Blocking file I/O")
        } else if code.contains("std::net::") || code.contains("use std::net") {
            Some("Blocking network I/O")
        } else if code.contains("std::process::Command") {
            Some("Blocking process I/O")
        } else if code.contains("reqwest::blocking") {
            Some("Blocking HTTP client")
        } else if (code.contains("std::io::stdin()") || code.contains("std::io::stdout()"))
            && is_in_async_function(lines, idx)
        {
            Some("Blocking stdin/stdout in async")
        } else {
            None
        };

        if let Some(kind) = kind {
            found.push((idx + 1, kind, *line));
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_io_in_async_fn_is_flagged() {
        let code = vec![
            "pub async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ];

        let found = scan_lines(&code);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 2);
        assert_eq!(found[0].1, "Blocking file I/O");
    }

    #[test]
    fn test_blocking_io_in_sync_fn_is_allowed() {
        let code = vec![
            "pub fn load_config() {",
            "    let contents = std::fs::read_to_string(\"lily.toml\")?;",
            "}",
        ];

        assert!(scan_lines(&code).is_empty());
    }

    #[test]
    fn test_stdin_in_async_fn_is_flagged() {
        let code = vec![
            "async fn read_console() {",
            "    let stdin = std::io::stdin();",
            "}",
        ];

        let found = scan_lines(&code);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, "Blocking stdin/stdout in async");
    }

    #[test]
    fn test_test_code_is_allowed() {
        let code = vec![
            "#[cfg(test)]",
            "mod tests {",
            "    #[tokio::test]",
            "    async fn test_something() {",
            "        let contents = std::fs::read_to_string(\"test.txt\");",
            "    }",
            "}",
        ];

        assert!(scan_lines(&code).is_empty());
    }

    #[test]
    fn test_commented_out_call_is_ignored() {
        let code = vec![
            "async fn fine() {",
            "    // std::fs::read_to_string(\"old.txt\")",
            "}",
        ];

        assert!(scan_lines(&code).is_empty());
    }
}
