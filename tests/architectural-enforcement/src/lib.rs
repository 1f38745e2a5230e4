//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the Lily production code:
//! - No blocking I/O inside async functions
//! - No sleep() calls outside of exponential backoff
//!
//! The helpers here do line-based scanning. They are heuristics, tuned for the
//! way this workspace formats its code, not a Rust parser.

use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["conductor/core/src", "conductor/daemon/src"];

/// Workspace root, independent of the directory cargo runs tests from
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under `dir`, sorted for stable reports
pub fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// The code portion of a line, with any trailing `//` comment removed
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Flavor of a function signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    Async,
    Sync,
}

/// Classify a line as a function signature, if it is one
///
/// Handles visibility (`pub`, `pub(crate)`, `pub(super)`) and the `const`,
/// `async` and `unsafe` qualifiers.
pub fn fn_signature(line: &str) -> Option<FnKind> {
    let mut rest = line.trim_start();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }

    let mut is_async = false;
    loop {
        if let Some(stripped) = rest.strip_prefix("async ") {
            is_async = true;
            rest = stripped;
        } else if let Some(stripped) = rest
            .strip_prefix("const ")
            .or_else(|| rest.strip_prefix("unsafe "))
        {
            rest = stripped;
        } else {
            break;
        }
    }

    if !rest.starts_with("fn ") {
        return None;
    }
    Some(if is_async { FnKind::Async } else { FnKind::Sync })
}

fn is_module_boundary(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("mod ") || line.starts_with("pub mod ") || line.starts_with("pub(crate) mod ")
}

/// The nearest function signature at or above `current_idx`
pub fn enclosing_fn(lines: &[&str], current_idx: usize) -> Option<(usize, FnKind)> {
    for i in (0..=current_idx).rev() {
        if let Some(kind) = fn_signature(lines[i]) {
            return Some((i, kind));
        }
        if is_module_boundary(lines[i]) {
            return None;
        }
    }
    None
}

/// Whether the line sits in test code
///
/// True inside a `#[cfg(test)]` module, or inside a function carrying a
/// `#[test]` / `#[tokio::test]` attribute.
pub fn is_in_test_code(lines: &[&str], current_idx: usize) -> bool {
    let in_test_module = (0..current_idx).any(|i| {
        lines[i].trim() == "#[cfg(test)]"
            && lines
                .get(i + 1)
                .is_some_and(|next| is_module_boundary(next))
    });
    if in_test_module {
        return true;
    }

    let Some((fn_idx, _)) = enclosing_fn(lines, current_idx) else {
        return false;
    };
    for i in (0..fn_idx).rev() {
        let line = lines[i].trim();
        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }
        if !line.starts_with("#[") && !line.starts_with("///") {
            break;
        }
    }
    false
}

/// Whether the line sits in an async function body
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    matches!(enclosing_fn(lines, current_idx), Some((_, FnKind::Async)))
}

/// Whether the line sits in a non-async function body
pub fn is_in_non_async_function(lines: &[&str], current_idx: usize) -> bool {
    matches!(enclosing_fn(lines, current_idx), Some((_, FnKind::Sync)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_signature_variants() {
        assert_eq!(fn_signature("fn main() {"), Some(FnKind::Sync));
        assert_eq!(fn_signature("    pub fn load() -> X {"), Some(FnKind::Sync));
        assert_eq!(fn_signature("pub(crate) async fn run(self) {"), Some(FnKind::Async));
        assert_eq!(fn_signature("    async fn back_off(&self) -> bool {"), Some(FnKind::Async));
        assert_eq!(fn_signature("pub const fn ms(v: u64) -> u64 {"), Some(FnKind::Sync));
        assert_eq!(fn_signature("let f = |x| x;"), None);
        assert_eq!(fn_signature("// fn commented() {}"), None);
    }

    #[test]
    fn test_enclosing_fn_stops_at_module() {
        let lines = vec!["mod inner {", "    let x = 1;", "}"];
        assert_eq!(enclosing_fn(&lines, 1), None);
    }

    #[test]
    fn test_test_module_is_test_code() {
        let lines = vec![
            "pub fn real() {}",
            "#[cfg(test)]",
            "mod tests {",
            "    fn helper() {",
            "        std::fs::write(\"x\", \"y\").unwrap();",
            "    }",
            "}",
        ];
        assert!(!is_in_test_code(&lines, 0));
        assert!(is_in_test_code(&lines, 4));
    }

    #[test]
    fn test_test_attribute_is_test_code() {
        let lines = vec![
            "#[tokio::test]",
            "async fn test_something() {",
            "    let contents = std::fs::read_to_string(\"test.txt\");",
            "}",
        ];
        assert!(is_in_test_code(&lines, 2));
    }
}
