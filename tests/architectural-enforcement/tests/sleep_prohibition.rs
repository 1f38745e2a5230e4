//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the conductor and daemon MUST NOT call sleep
//! methods. Wait on channels, cancellation tokens or I/O instead.
//! **Exceptions**: exponential backoff (retry logic only), periodic tasks
//! driven by `tokio::time::interval`, test code

use std::fs;
use std::path::Path;

use architectural_enforcement::{
    code_part, is_in_test_code, rust_sources, workspace_root, PRODUCTION_DIRS,
};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Exponential backoff in retry logic (recognition restarts)");
        eprintln!("  - Test code (#[test] or #[tokio::test] functions)");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep to 'wait' for events (use channels or a CancellationToken)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
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

    for line_number in sleep_violations(&lines) {
        violations.push(format!(
            "{}:{} - {}",
            path.display(),
            line_number,
            lines[line_number - 1].trim()
        ));
    }
}

/// Line numbers of disallowed sleep calls
fn sleep_violations(lines: &[&str]) -> Vec<usize> {
    let mut found = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        if !(code.contains("::sleep(") || code.contains(".sleep(") || code.contains(" sleep(")) {
            continue;
        }

        if is_in_test_code(lines, idx)
            || is_backoff_context(lines, idx)
            || is_interval_pattern(lines, idx)
        {
            continue;
        }

        found.push(idx + 1);
    }

    found
}

/// Check if sleep is used for exponential backoff (acceptable for retry logic)
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for line in &lines[context_range] {
        let line = line.to_lowercase();

        // Exponential growth: 2^n or a bit shift
        if line.contains("<<") || line.contains("pow") || line.contains("* 2") {
            has_backoff_calc = true;
        }

        if line.contains("retry")
            || line.contains("restart")
            || line.contains("backoff")
            || line.contains("attempt")
        {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

/// Check if this is a `tokio::time::interval` pattern (acceptable for periodic tasks)
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let backward = current_idx.saturating_sub(20)..current_idx;
    let forward = current_idx..std::cmp::min(current_idx + 5, lines.len());

    lines[backward]
        .iter()
        .any(|line| line.contains("interval.tick()") || line.contains("tokio::time::interval"))
        || lines[forward].iter().any(|line| line.contains("interval.tick()"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_sleep_is_flagged() {
        let code = vec![
            "async fn poll_until_ready() {",
            "    loop {",
            "        tokio::time::sleep(Duration::from_millis(10)).await;",
            "    }",
            "}",
        ];

        assert_eq!(sleep_violations(&code), vec![3]);
    }

    #[test]
    fn test_backoff_sleep_is_allowed() {
        let code = vec![
            "async fn restart() {",
            "    let delay = base_delay * (1 << attempt);",
            "    tracing::warn!(attempt, \"Retrying\");",
            "    tokio::time::sleep(delay).await;",
            "}",
        ];

        assert!(is_backoff_context(&code, 3));
        assert!(sleep_violations(&code).is_empty());
    }

    #[test]
    fn test_sleep_in_test_module_is_allowed() {
        let code = vec![
            "#[cfg(test)]",
            "mod tests {",
            "    #[tokio::test]",
            "    async fn test_timing() {",
            "        tokio::time::sleep(Duration::from_millis(5)).await;",
            "    }",
            "}",
        ];

        assert!(sleep_violations(&code).is_empty());
    }

    #[test]
    fn test_interval_pattern_is_allowed() {
        let code = vec![
            "async fn tick() {",
            "    let mut interval = tokio::time::interval(period);",
            "    interval.tick().await;",
            "    tokio::time::sleep(jitter).await;",
            "}",
        ];

        assert!(is_interval_pattern(&code, 3));
    }
}
