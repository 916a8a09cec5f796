use crate::types::Hunk;
use glob::{MatchOptions, Pattern};

pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "*.pb.go",
    "*_generated.go",
    "*.min.js",
    "package-lock.json",
    "go.sum",
    "vendor/*",
    "coverage/*",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Rule {
    /// `vendor` itself or anything below it.
    Vendor,
    /// `coverage` itself, anything below it, or any nested `coverage/` dir.
    Coverage,
    Glob(Pattern),
}

/// Excludes generated and vendored paths from review.
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    rules: Vec<Rule>,
}

impl Default for ScopeFilter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ScopeFilter {
    /// `None` applies [`DEFAULT_EXCLUDE_PATTERNS`]; an empty slice disables
    /// exclusion entirely. Malformed patterns are skipped.
    pub fn new(patterns: Option<&[String]>) -> Self {
        let rules = match patterns {
            Some(patterns) => patterns.iter().filter_map(|p| compile(p)).collect(),
            None => DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .filter_map(|p| compile(p))
                .collect(),
        };
        Self { rules }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        let basename = path.rsplit('/').next().unwrap_or(path);
        self.rules.iter().any(|rule| match rule {
            Rule::Vendor => path == "vendor" || path.starts_with("vendor/"),
            Rule::Coverage => {
                path == "coverage" || path.starts_with("coverage/") || path.contains("/coverage/")
            }
            Rule::Glob(pattern) => {
                pattern.matches_with(path, MATCH_OPTIONS)
                    || pattern.matches_with(basename, MATCH_OPTIONS)
            }
        })
    }

    pub fn filter(&self, hunks: Vec<Hunk>) -> Vec<Hunk> {
        hunks
            .into_iter()
            .filter(|hunk| !self.is_excluded(&hunk.file_path))
            .collect()
    }
}

fn compile(pattern: &str) -> Option<Rule> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return None;
    }
    match pattern.split('/').next() {
        Some("vendor") => return Some(Rule::Vendor),
        Some("coverage") => return Some(Rule::Coverage),
        _ => {}
    }
    match Pattern::new(pattern) {
        Ok(compiled) => Some(Rule::Glob(compiled)),
        Err(err) => {
            tracing::debug!(pattern, error = %err, "skipping malformed exclude pattern");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_exclude_generated_files() {
        let filter = ScopeFilter::default();
        assert!(filter.is_excluded("api/v1/service.pb.go"));
        assert!(filter.is_excluded("gen/model_generated.go"));
        assert!(filter.is_excluded("web/app.min.js"));
        assert!(filter.is_excluded("package-lock.json"));
        assert!(filter.is_excluded("sub/go.sum"));
        assert!(!filter.is_excluded("main.go"));
    }

    #[test]
    fn vendor_is_a_directory_prefix() {
        let filter = ScopeFilter::default();
        assert!(filter.is_excluded("vendor"));
        assert!(filter.is_excluded("vendor/foo"));
        assert!(filter.is_excluded("vendor/github.com/x/y.go"));
        assert!(!filter.is_excluded("vendorfoo"));
        assert!(!filter.is_excluded("src/vendor.go"));
    }

    #[test]
    fn coverage_matches_nested_directories() {
        let filter = ScopeFilter::default();
        assert!(filter.is_excluded("coverage"));
        assert!(filter.is_excluded("coverage/lcov.info"));
        assert!(filter.is_excluded("web/coverage/index.html"));
        assert!(!filter.is_excluded("src/coverage.go"));
    }

    #[test]
    fn malformed_patterns_are_skipped() {
        let patterns = vec!["[".to_string(), "*.log".to_string()];
        let filter = ScopeFilter::new(Some(&patterns));
        assert!(filter.is_excluded("debug.log"));
        assert!(!filter.is_excluded("main.go"));
    }

    #[test]
    fn empty_override_disables_exclusions() {
        let filter = ScopeFilter::new(Some(&[]));
        assert!(!filter.is_excluded("go.sum"));
        assert!(!filter.is_excluded("vendor/x.go"));
    }

    #[test]
    fn star_does_not_cross_directories_on_full_path() {
        let patterns = vec!["docs/*.md".to_string()];
        let filter = ScopeFilter::new(Some(&patterns));
        assert!(filter.is_excluded("docs/a.md"));
        assert!(!filter.is_excluded("docs/deep/a.md"));
    }
}
