//! Enriches hunks with the source of their enclosing function.
//!
//! Expansion is best-effort: any failure (unknown language, path outside the
//! repository, oversized file, parse failure, hunk outside a function) leaves
//! the hunk unchanged.

use crate::diff::hunk_line_range;
use crate::tokens;
use crate::types::{Hunk, LineRange};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tree_sitter::{Node, Parser};

/// Files above this size are never parsed.
pub const MAX_EXPAND_FILE_BYTES: u64 = 1024 * 1024;

const TRUNCATION_MARKER: &str = "\n... (truncated)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstFrontend {
    Go,
    Rust,
    Python,
}

impl AstFrontend {
    fn language(self) -> tree_sitter::Language {
        match self {
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    fn function_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Go => &["function_declaration", "method_declaration"],
            Self::Rust => &["function_item"],
            Self::Python => &["function_definition"],
        }
    }

    pub fn fence_tag(self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Python => "python",
        }
    }
}

/// Extension → frontend table, built once per run.
#[derive(Debug, Clone)]
pub struct AstRegistry {
    by_extension: HashMap<&'static str, AstFrontend>,
}

impl Default for AstRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AstRegistry {
    pub fn builtin() -> Self {
        let by_extension = [
            ("go", AstFrontend::Go),
            ("rs", AstFrontend::Rust),
            ("py", AstFrontend::Python),
        ]
        .into_iter()
        .collect();
        Self { by_extension }
    }

    pub fn empty() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    pub fn frontend_for(&self, path: &str) -> Option<AstFrontend> {
        let ext = Path::new(path).extension()?.to_str()?;
        self.by_extension.get(ext).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpan {
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: usize,
    pub end_byte: usize,
}

/// Smallest function whose line span fully contains `range`.
pub fn find_enclosing_function(
    frontend: AstFrontend,
    source: &str,
    range: LineRange,
) -> Option<FunctionSpan> {
    let mut parser = Parser::new();
    parser.set_language(&frontend.language()).ok()?;
    let tree = parser.parse(source, None)?;
    let mut best: Option<FunctionSpan> = None;
    visit(tree.root_node(), frontend.function_kinds(), range, &mut best);
    best
}

fn visit(node: Node<'_>, kinds: &[&str], range: LineRange, best: &mut Option<FunctionSpan>) {
    let start_line = u32::try_from(node.start_position().row + 1).unwrap_or(u32::MAX);
    let end_line = u32::try_from(node.end_position().row + 1).unwrap_or(u32::MAX);
    if start_line > range.start || end_line < range.end {
        return;
    }
    if kinds.contains(&node.kind()) {
        let span = FunctionSpan {
            start_line,
            end_line,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
        };
        let smaller = best.is_none_or(|current| {
            span.end_line - span.start_line < current.end_line - current.start_line
        });
        if smaller {
            *best = Some(span);
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, kinds, range, best);
    }
}

/// Joins `relative` onto `root`, rejecting anything that resolves outside it.
pub fn resolve_in_repo(root: &Path, relative: &str) -> Option<PathBuf> {
    let root = root.canonicalize().ok()?;
    let candidate = root.join(relative).canonicalize().ok()?;
    candidate.starts_with(&root).then_some(candidate)
}

/// Keeps the signature end of `source` within `max_tokens`, preferring to cut
/// at a newline in the second half of the budget.
pub fn truncate_to_tokens(source: &str, max_tokens: usize) -> String {
    if max_tokens == 0 || tokens::estimate(source) <= max_tokens {
        return source.to_string();
    }
    let mut limit = (max_tokens * 4).min(source.len());
    while !source.is_char_boundary(limit) {
        limit -= 1;
    }
    let head = &source[..limit];
    let cut = match head.rfind('\n') {
        Some(idx) if idx >= limit / 2 => idx,
        _ => limit,
    };
    format!("{}{TRUNCATION_MARKER}", &source[..cut])
}

/// Returns `hunk` with its context replaced by the enclosing function plus the
/// raw diff, or an unchanged clone when expansion does not apply.
pub fn expand_hunk(registry: &AstRegistry, repo_root: &Path, hunk: &Hunk, max_tokens: usize) -> Hunk {
    match try_expand(registry, repo_root, hunk, max_tokens) {
        Some(expanded) => expanded,
        None => hunk.clone(),
    }
}

fn try_expand(
    registry: &AstRegistry,
    repo_root: &Path,
    hunk: &Hunk,
    max_tokens: usize,
) -> Option<Hunk> {
    let frontend = registry.frontend_for(&hunk.file_path)?;
    let range = hunk_line_range(&hunk.raw_content)?;
    let path = resolve_in_repo(repo_root, &hunk.file_path)?;
    let metadata = std::fs::metadata(&path).ok()?;
    if metadata.len() > MAX_EXPAND_FILE_BYTES {
        tracing::debug!(file = %hunk.file_path, "file too large to expand");
        return None;
    }
    let source = std::fs::read_to_string(&path).ok()?;
    let span = find_enclosing_function(frontend, &source, range)?;
    let function_source = source.get(span.start_byte..span.end_byte)?;
    let function_source = truncate_to_tokens(function_source, max_tokens);
    let fence = "```";
    let context = format!(
        "## Enclosing function context\n\n{fence}{tag}\n{function_source}\n{fence}\n\n## Diff hunk\n\n{raw}",
        tag = frontend.fence_tag(),
        raw = hunk.raw_content,
    );
    Some(Hunk {
        file_path: hunk.file_path.clone(),
        raw_content: hunk.raw_content.clone(),
        context,
    })
}
