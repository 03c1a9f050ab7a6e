//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the tests in `tests/`. They enforce that
//! production code never blocks the async runtime:
//! - No thread sleeps
//! - No blocking HTTP client
//! - No blocking network or file I/O inside async functions
//!
//! Test modules (everything after `#[cfg(test)]`) and comments are ignored.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["courier/core/src", "courier/cli/src"];

/// A forbidden pattern
#[derive(Clone, Copy, Debug)]
pub struct Rule {
    /// Short description shown in reports
    pub name: &'static str,
    /// Substring that triggers the rule
    pub pattern: &'static str,
    /// Only flag the pattern inside `async fn` bodies
    pub async_only: bool,
}

/// One rule hit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File the hit is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Rule name
    pub rule: &'static str,
    /// Offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every `.rs` file under the production trees
pub fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files
}

/// Scan source text against `rules`
pub fn scan_source(path: &Path, content: &str, rules: &[Rule]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut in_async_fn = false;

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }

        let code = line.split("//").next().unwrap_or(line);
        if code.contains("fn ") {
            in_async_fn = code.contains("async fn ");
        }

        for rule in rules {
            if rule.async_only && !in_async_fn {
                continue;
            }
            if code.contains(rule.pattern) {
                violations.push(Violation {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    rule: rule.name,
                    text: line.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Scan every production file against `rules`
pub fn scan_production(rules: &[Rule]) -> Vec<Violation> {
    production_sources()
        .iter()
        .filter_map(|path| {
            fs::read_to_string(path)
                .ok()
                .map(|content| scan_source(path, &content, rules))
        })
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLEEP: Rule = Rule {
        name: "Thread sleep",
        pattern: "thread::sleep",
        async_only: false,
    };

    const FS_IN_ASYNC: Rule = Rule {
        name: "Blocking file I/O",
        pattern: "std::fs::",
        async_only: true,
    };

    #[test]
    fn test_flags_pattern_with_line_number() {
        let src = "fn a() {}\nfn b() {\n    std::thread::sleep(d);\n}\n";
        let hits = scan_source(Path::new("x.rs"), src, &[SLEEP]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 3);
    }

    #[test]
    fn test_ignores_comments_and_test_modules() {
        let src = "// thread::sleep is banned\nfn a() {}\n#[cfg(test)]\nmod tests {\n    fn t() { std::thread::sleep(d); }\n}\n";
        assert!(scan_source(Path::new("x.rs"), src, &[SLEEP]).is_empty());
    }

    #[test]
    fn test_async_only_rules() {
        let src = "fn load() {\n    std::fs::read_to_string(p);\n}\nasync fn serve() {\n    std::fs::read_to_string(p);\n}\n";
        let hits = scan_source(Path::new("x.rs"), src, &[FS_IN_ASYNC]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 5);
    }
}
