//! Task classification for quality-gate applicability.
//!
//! Inspects a task's title and description for category keywords and picks
//! the [`TaskCategory`](crate::models::TaskCategory) that determines which
//! quality gates apply. Classification is pure and deterministic: the same
//! title/description always yields the same category.

use crate::models::TaskCategory;
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

const DESIGN_KEYWORDS: &[&str] = &[
    "design",
    "schema",
    "architecture",
    "diagram",
    "plan",
    "blueprint",
    "outline",
    "structure",
    "model",
    "prototype",
];

const DOCUMENTATION_KEYWORDS: &[&str] = &[
    "document",
    "readme",
    "guide",
    "tutorial",
    "comment",
    "docs",
    "documentation",
    "wiki",
    "manual",
    "help",
    "changelog",
];

const CONFIGURATION_KEYWORDS: &[&str] = &[
    "config",
    "setup",
    "install",
    "deploy",
    "environment",
    "env",
    "configure",
    "settings",
    "provision",
    "migrate",
    "infrastructure",
];

const CODE_KEYWORDS_STRONG: &[&str] = &[
    "implement",
    "develop",
    "code",
    "function",
    "class",
    "fix",
    "bug",
    "handler",
    "service",
    "module",
    "component",
    "method",
];

const CODE_KEYWORDS_WEAK: &[&str] = &["create", "build", "add", "feature", "write", "api", "endpoint"];

const TESTING_KEYWORDS: &[&str] = &[
    "test", "tests", "testing", "coverage", "unittest", "pytest", "jest", "tdd", "bdd",
];

const REFACTORING_KEYWORDS: &[&str] = &[
    "refactor",
    "cleanup",
    "optimize",
    "improve",
    "simplify",
    "restructure",
    "reorganize",
    "consolidate",
    "modernize",
];

fn word_boundary_pattern(keywords: &[&str]) -> Regex {
    let mut sorted: Vec<&str> = keywords.to_vec();
    sorted.sort_by_key(|k| std::cmp::Reverse(k.len()));
    let alternation = sorted
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!(r"\b({})\b", alternation))
        .case_insensitive(true)
        .build()
        .expect("static keyword pattern is always valid regex")
}

macro_rules! cached_pattern {
    ($fn_name:ident, $keywords:expr) => {
        fn $fn_name() -> &'static Regex {
            static PATTERN: OnceLock<Regex> = OnceLock::new();
            PATTERN.get_or_init(|| word_boundary_pattern($keywords))
        }
    };
}

cached_pattern!(design_pattern, DESIGN_KEYWORDS);
cached_pattern!(doc_pattern, DOCUMENTATION_KEYWORDS);
cached_pattern!(config_pattern, CONFIGURATION_KEYWORDS);
cached_pattern!(code_strong_pattern, CODE_KEYWORDS_STRONG);
cached_pattern!(code_weak_pattern, CODE_KEYWORDS_WEAK);
cached_pattern!(testing_pattern, TESTING_KEYWORDS);
cached_pattern!(refactoring_pattern, REFACTORING_KEYWORDS);

fn spec_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        RegexBuilder::new(r"\bspec\b")
            .case_insensitive(true)
            .build()
            .unwrap()
    })
}

#[derive(Debug, Default)]
pub struct TaskClassifier;

impl TaskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classifies a task by title/description keyword analysis.
    ///
    /// Priority: TESTING > REFACTORING > MIXED (strong code + strong
    /// non-code) > DESIGN > DOCUMENTATION > CONFIGURATION >
    /// CODE_IMPLEMENTATION (default). `spec` counts as a DESIGN keyword
    /// unless a testing keyword is also present.
    pub fn classify(&self, title: &str, description: &str) -> TaskCategory {
        let text = format!("{} {}", title, description).to_lowercase();

        let has_testing = testing_pattern().is_match(&text);
        let has_refactoring = refactoring_pattern().is_match(&text);
        let mut has_design = design_pattern().is_match(&text);
        let has_doc = doc_pattern().is_match(&text);
        let has_config = config_pattern().is_match(&text);
        let has_code_strong = code_strong_pattern().is_match(&text);
        let has_code_weak = code_weak_pattern().is_match(&text);
        let has_spec = spec_pattern().is_match(&text);

        if has_spec && !has_testing {
            has_design = true;
        }

        if has_testing {
            return TaskCategory::Testing;
        }
        if has_refactoring {
            return TaskCategory::Refactoring;
        }

        let has_strong_non_code = has_design || has_doc;
        if has_strong_non_code && has_code_strong {
            return TaskCategory::Mixed;
        }

        if has_design {
            return TaskCategory::Design;
        }
        if has_doc {
            return TaskCategory::Documentation;
        }
        if has_config {
            return TaskCategory::Configuration;
        }
        if has_code_strong || has_code_weak {
            return TaskCategory::CodeImplementation;
        }

        TaskCategory::CodeImplementation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_testing_over_everything() {
        let c = TaskClassifier::new();
        assert_eq!(
            c.classify("Write unit tests for the design doc", "covers the schema"),
            TaskCategory::Testing
        );
    }

    #[test]
    fn classifies_refactoring() {
        let c = TaskClassifier::new();
        assert_eq!(
            c.classify("Refactor the payment handler", ""),
            TaskCategory::Refactoring
        );
    }

    #[test]
    fn classifies_mixed_on_strong_code_and_design() {
        let c = TaskClassifier::new();
        assert_eq!(
            c.classify("Design and implement the auth service", ""),
            TaskCategory::Mixed
        );
    }

    #[test]
    fn classifies_design() {
        let c = TaskClassifier::new();
        assert_eq!(
            c.classify("Design the database schema", ""),
            TaskCategory::Design
        );
    }

    #[test]
    fn spec_without_testing_is_design() {
        let c = TaskClassifier::new();
        assert_eq!(
            c.classify("Write the API spec", ""),
            TaskCategory::Design
        );
    }

    #[test]
    fn spec_with_testing_is_testing() {
        let c = TaskClassifier::new();
        assert_eq!(
            c.classify("Write test spec for the login flow", ""),
            TaskCategory::Testing
        );
    }

    #[test]
    fn classifies_documentation() {
        let c = TaskClassifier::new();
        assert_eq!(
            c.classify("Write the README guide", ""),
            TaskCategory::Documentation
        );
    }

    #[test]
    fn classifies_configuration() {
        let c = TaskClassifier::new();
        assert_eq!(
            c.classify("Configure the deploy environment", ""),
            TaskCategory::Configuration
        );
    }

    #[test]
    fn classifies_code_implementation_weak_keyword() {
        let c = TaskClassifier::new();
        assert_eq!(
            c.classify("Create the user API endpoint", ""),
            TaskCategory::CodeImplementation
        );
    }

    #[test]
    fn defaults_to_code_implementation() {
        let c = TaskClassifier::new();
        assert_eq!(c.classify("Ship it", "no keywords here"), TaskCategory::CodeImplementation);
    }

    #[test]
    fn is_deterministic() {
        let c = TaskClassifier::new();
        let a = c.classify("Implement the login handler", "uses JWT");
        let b = c.classify("Implement the login handler", "uses JWT");
        assert_eq!(a, b);
    }
}
