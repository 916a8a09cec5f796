//! Cursor rule discovery and per-file matching.
//!
//! Rules live in `.cursor/rules/**/*.mdc` at the repository root and in any
//! directory on the path to a changed file. Each file carries YAML front
//! matter followed by Markdown:
//!
//! ```text
//! ---
//! description: Go error handling
//! globs: "*.go"
//! alwaysApply: false
//! ---
//! Wrap errors with context.
//! ```

use crate::error::ParseError;
use crate::tokens;
use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_RULES_MAX_TOKENS: usize = 1000;

const RULES_DIR: &str = ".cursor/rules";
const RULE_EXTENSION: &str = "mdc";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Description keyword → inferred globs for rules that omit `globs`.
const KEYWORD_GLOBS: &[(&str, &[&str])] = &[
    ("typescript", &["*.ts", "*.tsx"]),
    ("javascript", &["*.js", "*.jsx", "*.mjs", "*.cjs"]),
    ("react", &["*.tsx", "*.jsx"]),
    ("go", &["*.go"]),
    ("golang", &["*.go"]),
    ("rust", &["*.rs"]),
    ("python", &["*.py"]),
    ("css", &["*.css", "*.scss"]),
    ("sql", &["*.sql"]),
    (
        "test",
        &["*_test.go", "*.test.ts", "*.spec.ts", "test_*.py", "*_test.py"],
    ),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum GlobsField {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct RuleFrontMatter {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    globs: Option<GlobsField>,
    #[serde(default, rename = "alwaysApply")]
    always_apply: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorRule {
    pub source: PathBuf,
    /// Repository-relative directory owning the `.cursor/rules` tree; globs
    /// are matched relative to it. Empty for the root.
    pub base_dir: String,
    pub description: String,
    pub globs: Vec<String>,
    pub always_apply: bool,
    pub content: String,
}

impl CursorRule {
    pub fn matches(&self, file_path: &str) -> bool {
        if self.always_apply {
            return true;
        }
        let relative = if self.base_dir.is_empty() {
            file_path
        } else {
            match file_path
                .strip_prefix(self.base_dir.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) => rest,
                None => return false,
            }
        };
        let basename = relative.rsplit('/').next().unwrap_or(relative);
        self.globs.iter().any(|glob| {
            let Ok(pattern) = Pattern::new(glob) else {
                return false;
            };
            pattern.matches_with(relative, MATCH_OPTIONS)
                || (!glob.contains('/') && pattern.matches_with(basename, MATCH_OPTIONS))
        })
    }
}

/// Splits an `.mdc` document into front matter and body and builds a rule.
pub fn parse_rule(text: &str, source: PathBuf, base_dir: &str) -> Result<CursorRule, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines();
    let (front, body) = match lines.next() {
        Some(first) if first.trim() == "---" => {
            let mut yaml_lines = Vec::new();
            let mut body_lines = Vec::new();
            let mut in_front_matter = true;
            for line in lines {
                if in_front_matter && line.trim() == "---" {
                    in_front_matter = false;
                    continue;
                }
                if in_front_matter {
                    yaml_lines.push(line);
                } else {
                    body_lines.push(line);
                }
            }
            if in_front_matter {
                return Err(ParseError::new("unterminated front matter"));
            }
            let yaml = yaml_lines.join("\n");
            let front: RuleFrontMatter = if yaml.trim().is_empty() {
                RuleFrontMatter::default()
            } else {
                serde_yaml::from_str(&yaml).map_err(|err| ParseError::new(err.to_string()))?
            };
            (front, body_lines.join("\n"))
        }
        _ => (RuleFrontMatter::default(), text.to_string()),
    };

    let description = front.description.unwrap_or_default().trim().to_string();
    let mut globs = match front.globs {
        Some(GlobsField::One(value)) => split_globs(&value),
        Some(GlobsField::Many(values)) => values
            .iter()
            .flat_map(|value| split_globs(value))
            .collect(),
        None => Vec::new(),
    };
    if globs.is_empty() && !front.always_apply && !description.is_empty() {
        globs = infer_globs(&description);
    }
    Ok(CursorRule {
        source,
        base_dir: base_dir.to_string(),
        description,
        globs,
        always_apply: front.always_apply,
        content: body.trim().to_string(),
    })
}

fn split_globs(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|glob| !glob.is_empty())
        .map(str::to_string)
        .collect()
}

/// Globs implied by words in a rule description.
pub fn infer_globs(description: &str) -> Vec<String> {
    let lowered = description.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    let mut globs: Vec<String> = Vec::new();
    for (keyword, patterns) in KEYWORD_GLOBS {
        let hit = words
            .iter()
            .any(|word| word == keyword || (*keyword == "test" && *word == "tests"));
        if !hit {
            continue;
        }
        for pattern in *patterns {
            if !globs.iter().any(|existing| existing == pattern) {
                globs.push((*pattern).to_string());
            }
        }
    }
    globs
}

/// Loads rule trees lazily and caches them per directory for one run.
#[derive(Debug)]
pub struct RuleLoader {
    repo_root: PathBuf,
    cache: HashMap<String, Vec<CursorRule>>,
}

impl RuleLoader {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            cache: HashMap::new(),
        }
    }

    /// Rules defined under `<dir>/.cursor/rules`. Missing or unreadable
    /// trees yield nothing.
    pub fn rules_in_dir(&mut self, dir: &str) -> &[CursorRule] {
        let repo_root = &self.repo_root;
        self.cache
            .entry(dir.to_string())
            .or_insert_with(|| load_dir(repo_root, dir))
    }

    /// Matching rules for `file_path`, `alwaysApply` rules first.
    pub fn rules_for_file(&mut self, file_path: &str) -> Vec<CursorRule> {
        let mut always = Vec::new();
        let mut matched = Vec::new();
        for dir in ancestor_dirs(file_path) {
            for rule in self.rules_in_dir(&dir) {
                if rule.always_apply {
                    always.push(rule.clone());
                } else if rule.matches(file_path) {
                    matched.push(rule.clone());
                }
            }
        }
        always.extend(matched);
        always
    }

    /// Per-file rule map for every path in `files`.
    pub fn preload<'a>(
        &mut self,
        files: impl IntoIterator<Item = &'a str>,
    ) -> HashMap<String, Vec<CursorRule>> {
        let mut by_file = HashMap::new();
        for file in files {
            if by_file.contains_key(file) {
                continue;
            }
            let rules = self.rules_for_file(file);
            by_file.insert(file.to_string(), rules);
        }
        by_file
    }
}

/// `""`, `a`, `a/b` for `a/b/c.go`.
fn ancestor_dirs(file_path: &str) -> Vec<String> {
    let mut dirs = vec![String::new()];
    let segments: Vec<&str> = file_path.split('/').collect();
    if segments.len() > 1 {
        for depth in 1..segments.len() {
            dirs.push(segments[..depth].join("/"));
        }
    }
    dirs
}

fn load_dir(repo_root: &Path, dir: &str) -> Vec<CursorRule> {
    let rules_root = if dir.is_empty() {
        repo_root.join(RULES_DIR)
    } else {
        repo_root.join(dir).join(RULES_DIR)
    };
    if !rules_root.is_dir() {
        return Vec::new();
    }
    let mut files = Vec::new();
    collect_rule_files(&rules_root, &mut files);
    files.sort();
    let mut rules = Vec::new();
    for path in files {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unreadable rule");
                continue;
            }
        };
        match parse_rule(&text, path.clone(), dir) {
            Ok(rule) if !rule.content.is_empty() => rules.push(rule),
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping malformed rule");
            }
        }
    }
    rules
}

fn collect_rule_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rule_files(&path, out);
        } else if path.extension().and_then(|ext| ext.to_str()) == Some(RULE_EXTENSION) {
            out.push(path);
        }
    }
}

/// `## Project review criteria` section for `rules`, capped at `max_tokens`.
/// Later rules are dropped once the cap is reached.
pub fn format_rules_section(rules: &[CursorRule], max_tokens: usize) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    let mut used = 0;
    let mut ordered: Vec<&CursorRule> = rules.iter().filter(|rule| rule.always_apply).collect();
    ordered.extend(rules.iter().filter(|rule| !rule.always_apply));
    for rule in ordered {
        let cost = tokens::estimate(&rule.content);
        if max_tokens > 0 && used + cost > max_tokens {
            break;
        }
        used += cost;
        parts.push(&rule.content);
    }
    if parts.is_empty() {
        return None;
    }
    Some(format!("## Project review criteria\n\n{}", parts.join("\n\n")))
}
