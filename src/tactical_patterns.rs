//! Maps raw agent error text to recoverable intervention strategies.
//!
//! Patterns are checked in order; the first match wins, so more specific
//! patterns should be registered before more general ones.

use crate::models::{InterventionStrategy, TacticalPattern};
use regex::RegexBuilder;

#[derive(Debug, Default)]
pub struct MatchDiagnostics {
    pub matched_pattern: Option<String>,
    pub patterns_checked: usize,
    pub error_message_empty: bool,
}

pub struct TacticalPatternMatcher {
    patterns: Vec<TacticalPattern>,
}

impl Default for TacticalPatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TacticalPatternMatcher {
    pub fn new() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }

    /// First matching pattern, or `None` if the error text is empty or
    /// matches nothing.
    pub fn match_error(&self, error_message: Option<&str>) -> Option<&TacticalPattern> {
        let error_message = error_message?;
        if error_message.is_empty() {
            return None;
        }
        self.patterns
            .iter()
            .find(|pattern| pattern_matches(pattern, error_message))
    }

    pub fn match_error_with_diagnostics(
        &self,
        error_message: Option<&str>,
    ) -> (Option<&TacticalPattern>, MatchDiagnostics) {
        let mut diagnostics = MatchDiagnostics {
            matched_pattern: None,
            patterns_checked: 0,
            error_message_empty: error_message.map(str::is_empty).unwrap_or(true),
        };

        let error_message = match error_message {
            Some(text) => text,
            None => return (None, diagnostics),
        };

        for (i, pattern) in self.patterns.iter().enumerate() {
            diagnostics.patterns_checked = i + 1;
            if pattern_matches(pattern, error_message) {
                diagnostics.matched_pattern = Some(pattern.id.clone());
                return (Some(pattern), diagnostics);
            }
        }
        (None, diagnostics)
    }

    /// Attempts a small ordered set of regexes used in common error formats;
    /// returns the first hit, stripped of trailing punctuation.
    pub fn extract_file_path(&self, error_message: &str) -> Option<String> {
        if error_message.is_empty() {
            return None;
        }

        const EXTRACTORS: &[&str] = &[
            r"exists:\s*['\x22]?([^\s'\x22]+\.[a-zA-Z]+)['\x22]?",
            r"directory:\s*['\x22]?([^'\x22]+)['\x22]?",
            r"non-existent file:\s*([^\s]+)",
            r":\s*['\x22]?([^\s'\x22:]+\.[a-zA-Z0-9]+)['\x22]?\s*$",
        ];

        for raw in EXTRACTORS {
            let re = match RegexBuilder::new(raw).case_insensitive(true).build() {
                Ok(re) => re,
                Err(_) => continue,
            };
            if let Some(caps) = re.captures(error_message) {
                if let Some(m) = caps.get(1) {
                    let trimmed = m.as_str().trim().trim_end_matches(['.', ',', ';', ':', '\'', '"']);
                    return Some(trimmed.to_string());
                }
            }
        }
        None
    }

    pub fn add_pattern(&mut self, pattern: TacticalPattern) {
        tracing::info!("Added tactical pattern: {}", pattern.id);
        self.patterns.push(pattern);
    }

    pub fn remove_pattern(&mut self, pattern_id: &str) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.id != pattern_id);
        let removed = self.patterns.len() != before;
        if removed {
            tracing::info!("Removed tactical pattern: {}", pattern_id);
        }
        removed
    }

    pub fn get_patterns_by_category(&self, category: &str) -> Vec<&TacticalPattern> {
        self.patterns.iter().filter(|p| p.category == category).collect()
    }
}

fn pattern_matches(pattern: &TacticalPattern, error_message: &str) -> bool {
    match RegexBuilder::new(&pattern.matcher)
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.is_match(error_message),
        Err(_) => {
            tracing::warn!("Invalid regex pattern: {}", pattern.matcher);
            false
        }
    }
}

fn default_patterns() -> Vec<TacticalPattern> {
    vec![
        TacticalPattern {
            id: "file_already_exists".to_string(),
            matcher: r"(file\s+(already\s+)?exists|FileExistsError|Errno\s*17)".to_string(),
            category: "file_conflict".to_string(),
            strategy: InterventionStrategy::ConvertCreateToEdit,
            description: "Detects when agent tries to create a file that already exists"
                .to_string(),
        },
        TacticalPattern {
            id: "file_not_found".to_string(),
            matcher: r"(FileNotFoundError|No such file|Cannot modify non-existent|Errno\s*2)"
                .to_string(),
            category: "file_conflict".to_string(),
            strategy: InterventionStrategy::RetryWithContext,
            description: "Detects when agent tries to access a non-existent file".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_already_exists_matches() {
        let matcher = TacticalPatternMatcher::new();
        let result = matcher.match_error(Some("FileExistsError: File already exists: src/Button.tsx"));
        assert_eq!(result.unwrap().id, "file_already_exists");
    }

    #[test]
    fn file_not_found_matches() {
        let matcher = TacticalPatternMatcher::new();
        let result = matcher.match_error(Some("FileNotFoundError: no such file or directory"));
        assert_eq!(result.unwrap().id, "file_not_found");
    }

    #[test]
    fn empty_and_none_return_no_match() {
        let matcher = TacticalPatternMatcher::new();
        assert!(matcher.match_error(Some("")).is_none());
        assert!(matcher.match_error(None).is_none());
    }

    #[test]
    fn extract_file_path_from_exists_message() {
        let matcher = TacticalPatternMatcher::new();
        let path = matcher
            .extract_file_path("FileExistsError: File already exists: src/Button.tsx")
            .unwrap();
        assert_eq!(path, "src/Button.tsx");
    }

    #[test]
    fn diagnostics_report_patterns_checked() {
        let matcher = TacticalPatternMatcher::new();
        let (matched, diagnostics) =
            matcher.match_error_with_diagnostics(Some("No such file or directory"));
        assert_eq!(matched.unwrap().id, "file_not_found");
        assert_eq!(diagnostics.patterns_checked, 2);
        assert!(!diagnostics.error_message_empty);
    }

    #[test]
    fn custom_pattern_can_be_added_and_removed() {
        let mut matcher = TacticalPatternMatcher::new();
        matcher.add_pattern(TacticalPattern {
            id: "custom".to_string(),
            matcher: r"permission denied".to_string(),
            category: "permission".to_string(),
            strategy: InterventionStrategy::CreateBackup,
            description: "permission error".to_string(),
        });
        assert!(matcher.match_error(Some("Permission Denied")).is_some());
        assert!(matcher.remove_pattern("custom"));
        assert!(matcher.match_error(Some("Permission Denied")).is_none());
    }
}
