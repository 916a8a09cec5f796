//! Content-addressed hunk identity.
//!
//! The strict ID hashes the hunk exactly (modulo line endings); the semantic
//! ID hashes it after comments are removed and whitespace runs collapsed, so
//! comment-only or reformat-only edits keep the same semantic ID.

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentStyle {
    /// `//` line comments and `/* */` block comments.
    CFamily,
    /// `#` to end of line.
    Hash,
    None,
}

fn comment_style(path: &str) -> CommentStyle {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "go" | "rs" | "c" | "h" | "cc" | "cpp" | "hpp" | "cxx" | "java" | "js" | "jsx" | "ts"
        | "tsx" | "mjs" | "cjs" | "swift" | "kt" | "kts" | "cs" | "scala" | "dart" | "php"
        | "proto" => CommentStyle::CFamily,
        "sh" | "bash" | "zsh" | "py" | "rb" | "pl" | "r" | "yaml" | "yml" | "toml" | "tf"
        | "cmake" | "mk" => CommentStyle::Hash,
        _ => CommentStyle::None,
    }
}

pub fn normalize_crlf(content: &str) -> String {
    content.replace("\r\n", "\n")
}

fn hash(path: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b":");
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn strict_id(path: &str, content: &str) -> String {
    hash(path, &normalize_crlf(content))
}

pub fn semantic_id(path: &str, content: &str) -> String {
    let normalized = normalize_crlf(content);
    let stripped = match comment_style(path) {
        CommentStyle::CFamily => strip_c_comments(&normalized),
        CommentStyle::Hash => strip_hash_comments(&normalized),
        CommentStyle::None => normalized,
    };
    hash(path, &collapse_whitespace(&stripped))
}

/// Removes `//` and `/* */` comments, leaving string literals alone.
fn strip_c_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string: Option<char> = None;
    let mut in_block = false;
    while let Some(c) = chars.next() {
        if in_block {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block = false;
                out.push(' ');
            } else if c == '\n' {
                out.push('\n');
            }
            continue;
        }
        if let Some(quote) = in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == quote || c == '\n' {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '`' => {
                in_string = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block = true;
            }
            _ => out.push(c),
        }
    }
    out
}

/// Removes `#` comments, leaving string literals alone.
fn strip_hash_comments(text: &str) -> String {
    text.lines()
        .map(|line| {
            let mut in_string: Option<char> = None;
            let mut escaped = false;
            for (idx, c) in line.char_indices() {
                if escaped {
                    escaped = false;
                    continue;
                }
                match (in_string, c) {
                    (Some(_), '\\') => escaped = true,
                    (Some(quote), c) if c == quote => in_string = None,
                    (None, '"' | '\'') => in_string = Some(c),
                    (None, '#') => return &line[..idx],
                    _ => {}
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
