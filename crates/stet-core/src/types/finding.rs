use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Nitpick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bug,
    Security,
    Correctness,
    Performance,
    Style,
    Maintainability,
    BestPractice,
    Testing,
    Documentation,
    Design,
    Accessibility,
    /// Any category the model invents that is not listed above.
    #[serde(other)]
    Other,
}

impl Category {
    /// Categories held to the stricter maintainability confidence bar.
    pub fn is_maintainability_like(self) -> bool {
        matches!(
            self,
            Self::Maintainability
                | Self::Style
                | Self::BestPractice
                | Self::Documentation
                | Self::Testing
                | Self::Design
                | Self::Other
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn is_valid(&self) -> bool {
        self.start >= 1 && self.start <= self.end
    }

    pub fn contains(&self, line: u32) -> bool {
        self.start <= line && line <= self.end
    }

    pub fn overlaps(&self, other: &LineRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<LineRange>,
    pub severity: Severity,
    pub category: Category,
    #[serde(default)]
    pub confidence: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_uri: Option<String>,
}

impl Finding {
    /// Lines the finding points at. A valid range wins; otherwise the single
    /// line (clamped to 1), falling back to the start of an invalid range.
    pub fn location(&self) -> LineRange {
        if let Some(range) = self.range.filter(LineRange::is_valid) {
            return range;
        }
        let line = match (self.line, self.range) {
            (Some(line), _) => line.max(1),
            (None, Some(range)) => range.start.max(1),
            (None, None) => 1,
        };
        LineRange {
            start: line,
            end: line,
        }
    }

    /// First line of [`Finding::location`].
    pub fn effective_line(&self) -> u32 {
        self.location().start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(line: Option<u32>, range: Option<LineRange>) -> Finding {
        Finding {
            id: String::new(),
            file: "a.go".to_string(),
            line,
            range,
            severity: Severity::Warning,
            category: Category::Bug,
            confidence: 1.0,
            message: "m".to_string(),
            suggestion: None,
            cursor_uri: None,
        }
    }

    #[test]
    fn range_without_line_locates_at_start() {
        let f = finding(None, Some(LineRange { start: 7, end: 9 }));
        assert_eq!(f.effective_line(), 7);
        assert_eq!(f.location(), LineRange { start: 7, end: 9 });
    }

    #[test]
    fn inverted_range_falls_back_to_line() {
        let f = finding(Some(4), Some(LineRange { start: 9, end: 7 }));
        assert_eq!(f.location(), LineRange { start: 4, end: 4 });
    }

    #[test]
    fn missing_location_is_line_one() {
        assert_eq!(finding(None, None).effective_line(), 1);
        assert_eq!(finding(Some(0), None).effective_line(), 1);
    }

    #[test]
    fn category_wire_names() {
        let parsed: Category = serde_json::from_str("\"best_practice\"").unwrap();
        assert_eq!(parsed, Category::BestPractice);
        assert!(parsed.is_maintainability_like());
        assert!(!Category::Security.is_maintainability_like());
    }
}
