//! Definition lookup for identifiers referenced by a hunk.
//!
//! Resolution shells out to `git grep` and is best-effort: any failure yields
//! no definitions.

use crate::diff::hunk_line_range;
use crate::expand::resolve_in_repo;
use crate::tokens;
use crate::types::Hunk;
use regex::Regex;
use stet_vcs::{GrepMatch, VcsBackend};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

pub const SYMBOL_GREP_DEADLINE: Duration = Duration::from_secs(5);
pub const MAX_CALLERS: usize = 5;

const MAX_DOC_LINES: usize = 8;
const MAX_SIGNATURE_CHARS: usize = 240;

static CALL_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("call pattern"));
static TYPE_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][A-Za-z0-9_]{2,})\b").expect("type pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolResolver {
    Go,
    Rust,
    Python,
    JavaScript,
}

impl SymbolResolver {
    fn pathspecs(self) -> Vec<String> {
        let globs: &[&str] = match self {
            Self::Go => &["*.go"],
            Self::Rust => &["*.rs"],
            Self::Python => &["*.py"],
            Self::JavaScript => &["*.js", "*.jsx", "*.ts", "*.tsx", "*.mjs"],
        };
        globs.iter().map(|glob| (*glob).to_string()).collect()
    }

    /// Extended regex matching a definition of `name`. Shared by `git grep`
    /// and the in-process matcher, so it sticks to POSIX classes.
    fn definition_pattern(self, name: &str) -> String {
        match self {
            Self::Go => format!(
                r"^(func (\([^)]*\) )?{name}[(\[]|type {name}[[:space:]]|(var|const) {name}[[:space:]])"
            ),
            Self::Rust => format!(
                r"^[[:space:]]*(pub(\([^)]*\))? )?((async|const|unsafe|extern) )*(fn|struct|enum|trait|type|const|static) {name}[^A-Za-z0-9_]"
            ),
            Self::Python => format!(r"^[[:space:]]*(async )?(def|class) {name}[(:]"),
            Self::JavaScript => format!(
                r"^[[:space:]]*(export )?(default )?(async )?(function\*? {name}[^A-Za-z0-9_$]|class {name}[^A-Za-z0-9_$]|(interface|type) {name}[^A-Za-z0-9_$]|(const|let|var) {name}[[:space:]]*=)"
            ),
        }
    }

    fn function_name_pattern(self) -> &'static str {
        match self {
            Self::Go => r"func (\([^)]*\) )?([A-Za-z_][A-Za-z0-9_]*)",
            Self::Rust => r"fn ([A-Za-z_][A-Za-z0-9_]*)",
            Self::Python => r"def ([A-Za-z_][A-Za-z0-9_]*)",
            Self::JavaScript => r"function\*? ([A-Za-z_$][A-Za-z0-9_$]*)",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Go => &[
                "break", "case", "chan", "const", "continue", "default", "defer", "else",
                "fallthrough", "for", "func", "go", "goto", "if", "import", "interface", "map",
                "package", "range", "return", "select", "struct", "switch", "type", "var",
                "append", "cap", "close", "copy", "delete", "len", "make", "new", "panic",
                "print", "println", "recover", "string", "int", "byte", "error",
            ],
            Self::Rust => &[
                "as", "async", "await", "break", "const", "continue", "crate", "else", "enum",
                "extern", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod",
                "move", "mut", "pub", "ref", "return", "self", "Self", "static", "struct",
                "super", "trait", "type", "unsafe", "use", "where", "while", "Some", "None",
                "Ok", "Err", "Box", "Vec", "String", "Option", "Result",
            ],
            Self::Python => &[
                "and", "as", "assert", "async", "await", "break", "class", "continue", "def",
                "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
                "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise",
                "return", "try", "while", "with", "yield", "print", "len", "range", "str",
                "int", "dict", "list", "set", "tuple", "super", "isinstance",
            ],
            Self::JavaScript => &[
                "async", "await", "break", "case", "catch", "class", "const", "continue",
                "default", "delete", "do", "else", "export", "extends", "finally", "for",
                "function", "if", "import", "in", "instanceof", "let", "new", "return",
                "super", "switch", "this", "throw", "try", "typeof", "var", "void", "while",
                "yield", "require", "console", "Promise", "Array", "Object", "String",
            ],
        }
    }

    fn doc_prefixes(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["#"],
            _ => &["//", "/*", "*"],
        }
    }
}

/// Extension → resolver table, built once per run.
#[derive(Debug, Clone)]
pub struct SymbolRegistry {
    by_extension: HashMap<&'static str, SymbolResolver>,
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SymbolRegistry {
    pub fn builtin() -> Self {
        let by_extension = [
            ("go", SymbolResolver::Go),
            ("rs", SymbolResolver::Rust),
            ("py", SymbolResolver::Python),
            ("js", SymbolResolver::JavaScript),
            ("jsx", SymbolResolver::JavaScript),
            ("ts", SymbolResolver::JavaScript),
            ("tsx", SymbolResolver::JavaScript),
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

    pub fn resolver_for(&self, path: &str) -> Option<SymbolResolver> {
        let ext = Path::new(path).extension()?.to_str()?;
        self.by_extension.get(ext).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDefinition {
    pub symbol: String,
    pub file: String,
    pub line: u32,
    pub signature: String,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallGraph {
    pub function: String,
    pub callers: Vec<CallSite>,
}

/// Identifiers referenced on the added and context lines of `hunk`, in first
/// appearance order.
pub fn candidate_symbols(resolver: SymbolResolver, hunk: &Hunk, limit: usize) -> Vec<String> {
    let keywords = resolver.keywords();
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for line in hunk.raw_content.lines().skip(1) {
        let Some(code) = line.strip_prefix('+').or_else(|| line.strip_prefix(' ')) else {
            continue;
        };
        let calls = CALL_IDENT.captures_iter(code).filter_map(|c| c.get(1));
        let types = TYPE_IDENT.captures_iter(code).filter_map(|c| c.get(1));
        for found in calls.chain(types) {
            let name = found.as_str();
            if keywords.contains(&name) || !seen.insert(name.to_string()) {
                continue;
            }
            names.push(name.to_string());
            if names.len() >= limit {
                return names;
            }
        }
    }
    names
}

/// Definitions of symbols referenced by `hunk`, capped at `max_definitions`.
/// Definitions inside the hunk itself are skipped.
pub async fn resolve_definitions(
    vcs: &dyn VcsBackend,
    resolver: SymbolResolver,
    hunk: &Hunk,
    max_definitions: usize,
) -> Vec<SymbolDefinition> {
    if max_definitions == 0 {
        return Vec::new();
    }
    let names = candidate_symbols(resolver, hunk, max_definitions * 2);
    if names.is_empty() {
        return Vec::new();
    }
    let alternation = format!("({})", names.join("|"));
    let pattern = resolver.definition_pattern(&alternation);
    let matches = match vcs
        .grep(&pattern, &resolver.pathspecs(), SYMBOL_GREP_DEADLINE)
        .await
    {
        Ok(matches) => matches,
        Err(err) => {
            tracing::debug!(file = %hunk.file_path, error = %err, "symbol lookup failed");
            return Vec::new();
        }
    };
    let matchers: Vec<(String, Regex)> = names
        .iter()
        .filter_map(|name| {
            Regex::new(&resolver.definition_pattern(name))
                .ok()
                .map(|regex| (name.clone(), regex))
        })
        .collect();
    let own_range = hunk_line_range(&hunk.raw_content);
    let mut definitions = Vec::new();
    for GrepMatch { path, line, text } in matches {
        if path == hunk.file_path && own_range.is_some_and(|range| range.contains(line)) {
            continue;
        }
        let Some((symbol, _)) = matchers.iter().find(|(_, regex)| regex.is_match(&text)) else {
            continue;
        };
        let docstring = read_docstring(vcs.root(), &path, line, resolver.doc_prefixes());
        definitions.push(SymbolDefinition {
            symbol: symbol.clone(),
            signature: truncate_chars(text.trim(), MAX_SIGNATURE_CHARS),
            file: path,
            line,
            docstring,
        });
        if definitions.len() >= max_definitions {
            break;
        }
    }
    definitions
}

/// Comment lines directly above `line` in `file`.
fn read_docstring(root: &Path, file: &str, line: u32, prefixes: &[&str]) -> Option<String> {
    let path = resolve_in_repo(root, file)?;
    let source = std::fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = source.lines().collect();
    let mut idx = usize::try_from(line).ok()?.checked_sub(1)?;
    let mut doc = Vec::new();
    while idx > 0 && doc.len() < MAX_DOC_LINES {
        idx -= 1;
        let candidate = lines.get(idx)?.trim();
        if prefixes.iter().any(|prefix| candidate.starts_with(prefix)) {
            doc.push(candidate);
        } else {
            break;
        }
    }
    if doc.is_empty() {
        return None;
    }
    doc.reverse();
    Some(doc.join("\n"))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Name of the function the hunk sits in, from the `@@` header tail or the
/// expanded function context.
pub fn enclosing_function_name(resolver: SymbolResolver, hunk: &Hunk) -> Option<String> {
    let regex = Regex::new(resolver.function_name_pattern()).ok()?;
    let header = hunk.raw_content.lines().next()?;
    let tail = header.splitn(3, "@@").nth(2).unwrap_or_default();
    let from_context = hunk
        .context
        .strip_prefix("## Enclosing function context\n\n")
        .and_then(|rest| rest.lines().nth(1));
    [Some(tail), from_context]
        .into_iter()
        .flatten()
        .find_map(|text| {
            regex
                .captures(text)
                .and_then(|captures| captures.iter().flatten().last())
                .map(|name| name.as_str().to_string())
        })
}

/// Call sites of the enclosing function, excluding its definition.
pub async fn resolve_callers(
    vcs: &dyn VcsBackend,
    resolver: SymbolResolver,
    hunk: &Hunk,
) -> Option<CallGraph> {
    let function = enclosing_function_name(resolver, hunk)?;
    let pattern = format!("(^|[^A-Za-z0-9_]){function}[[:space:]]*\\(");
    let matches = vcs
        .grep(&pattern, &resolver.pathspecs(), SYMBOL_GREP_DEADLINE)
        .await
        .map_err(|err| tracing::debug!(error = %err, "caller lookup failed"))
        .ok()?;
    let definition = Regex::new(&resolver.definition_pattern(&function)).ok()?;
    let callers: Vec<CallSite> = matches
        .into_iter()
        .filter(|found| !definition.is_match(&found.text))
        .take(MAX_CALLERS)
        .map(|found| CallSite {
            file: found.path,
            line: found.line,
            text: truncate_chars(found.text.trim(), MAX_SIGNATURE_CHARS),
        })
        .collect();
    if callers.is_empty() {
        return None;
    }
    Some(CallGraph { function, callers })
}

/// `## Symbol definitions (for context)` block; later entries are dropped
/// once `max_tokens` would be exceeded.
pub fn format_definitions(definitions: &[SymbolDefinition], max_tokens: usize) -> Option<String> {
    let header = "## Symbol definitions (for context)\n";
    let mut out = String::from(header);
    let mut used = tokens::estimate(header);
    let mut included = 0;
    for definition in definitions {
        let mut entry = format!("\n### {} (File: {}, Line: {})\n", definition.symbol, definition.file, definition.line);
        if let Some(doc) = &definition.docstring {
            entry.push_str(doc);
            entry.push('\n');
        }
        entry.push_str("```\n");
        entry.push_str(&definition.signature);
        entry.push_str("\n```\n");
        let cost = tokens::estimate(&entry);
        if max_tokens > 0 && used + cost > max_tokens {
            break;
        }
        used += cost;
        out.push_str(&entry);
        included += 1;
    }
    (included > 0).then_some(out)
}

pub fn format_call_graph(graph: &CallGraph) -> String {
    let mut out = format!("## Call graph (for context)\n\nCallers of `{}`:\n", graph.function);
    for caller in &graph.callers {
        out.push_str(&format!("- {}:{}: {}\n", caller.file, caller.line, caller.text));
    }
    out
}
