use crate::types::{Hunk, HunkScope, LineRange};
use regex::Regex;
use std::sync::LazyLock;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header pattern")
});

const FILE_MARKER: &str = "diff --git ";
const BINARY_MARKER: &str = "Binary files ";

/// Splits unified diff text into hunks in diff order. Binary sections are
/// skipped.
pub fn parse_unified_diff(text: &str) -> Vec<Hunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut hunks = Vec::new();
    for section in split_sections(text) {
        if section.contains(BINARY_MARKER) {
            continue;
        }
        let Some(path) = section_path(section) else {
            continue;
        };
        parse_section_hunks(&path, section, &mut hunks);
    }
    hunks
}

fn split_sections(text: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.starts_with(FILE_MARKER) {
            starts.push(offset);
        }
        offset += line.len();
    }
    if starts.is_empty() {
        return vec![text];
    }
    let mut sections = Vec::with_capacity(starts.len());
    for (idx, start) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).copied().unwrap_or(text.len());
        sections.push(&text[*start..end]);
    }
    sections
}

fn section_path(section: &str) -> Option<String> {
    let mut lines = section.lines();
    if let Some(header) = lines.next().and_then(|line| line.strip_prefix(FILE_MARKER)) {
        if let Some(idx) = header.rfind(" b/") {
            let path = header[idx + 3..].trim();
            if !path.is_empty() {
                return Some(path.to_string());
            }
        }
    }
    let mut minus = None;
    for line in section.lines() {
        if line.starts_with("@@") {
            break;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(path) = header_file_path(rest) {
                return Some(path);
            }
        } else if let Some(rest) = line.strip_prefix("--- ") {
            minus = header_file_path(rest);
        }
    }
    minus
}

/// Path from a `---`/`+++` line: strips `a/`/`b/` and any TAB-separated
/// timestamp; `/dev/null` yields nothing.
fn header_file_path(rest: &str) -> Option<String> {
    let name = rest.split('\t').next().unwrap_or(rest).trim();
    if name.is_empty() || name == "/dev/null" {
        return None;
    }
    let name = name
        .strip_prefix("a/")
        .or_else(|| name.strip_prefix("b/"))
        .unwrap_or(name);
    Some(name.to_string())
}

fn parse_section_hunks(path: &str, section: &str, out: &mut Vec<Hunk>) {
    let mut current: Option<Vec<&str>> = None;
    for line in section.lines() {
        if HUNK_HEADER.is_match(line) {
            if let Some(lines) = current.take() {
                out.push(Hunk::new(path, lines.join("\n")));
            }
            current = Some(vec![line]);
            continue;
        }
        let Some(lines) = current.as_mut() else {
            continue;
        };
        if line.is_empty() || line.starts_with([' ', '+', '-']) {
            lines.push(line);
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        } else {
            out.push(Hunk::new(path, lines.join("\n")));
            current = None;
        }
    }
    if let Some(lines) = current {
        out.push(Hunk::new(path, lines.join("\n")));
    }
}

/// New-file line range named by the hunk's `@@` header.
pub fn hunk_line_range(raw_content: &str) -> Option<LineRange> {
    let first = raw_content.lines().next()?;
    let captures = HUNK_HEADER.captures(first)?;
    let start: i64 = captures.get(3)?.as_str().parse().ok()?;
    let count: i64 = match captures.get(4) {
        Some(value) => value.as_str().parse().ok()?,
        None => 1,
    };
    if start <= 0 || count <= 0 {
        return None;
    }
    let start = u32::try_from(start).ok()?;
    let end = u32::try_from(i64::from(start) + count - 1).ok()?;
    Some(LineRange { start, end })
}

/// New-file start line from the header, accepting zero-length hunks.
pub fn hunk_new_start(raw_content: &str) -> Option<u32> {
    let first = raw_content.lines().next()?;
    let start: u32 = HUNK_HEADER.captures(first)?.get(3)?.as_str().parse().ok()?;
    (start > 0).then_some(start)
}

pub fn count_hunk_scope(hunks: &[Hunk]) -> HunkScope {
    let mut scope = HunkScope {
        hunks_reviewed: hunks.len() as u64,
        ..HunkScope::default()
    };
    for hunk in hunks {
        scope.chars_reviewed += hunk.raw_content.len() as u64;
        for line in hunk.raw_content.lines() {
            if let Some(added) = line.strip_prefix('+') {
                if line.starts_with("+++") {
                    continue;
                }
                scope.lines_added += 1;
                scope.chars_added += added.len() as u64;
            } else if let Some(removed) = line.strip_prefix('-') {
                if line.starts_with("---") {
                    continue;
                }
                scope.lines_removed += 1;
                scope.chars_deleted += removed.len() as u64;
            }
        }
    }
    scope
}
