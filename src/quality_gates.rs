//! Task-category-aware quality-gate pipeline (spec.md §4.4).
//!
//! Selects the applicable gates for a task's [`TaskCategory`], runs them,
//! and produces per-gate pass/fail plus aggregated findings. Complexity and
//! security analysis are pattern/heuristic based — language-agnostic line
//! scanners rather than a shelled-out linter, grounded in the OWASP-style
//! allowlist/denylist approach the teacher already uses in `validation.rs`.

use crate::models::{Evidence, Finding, FindingCategory, QualityGateType, Severity, TaskCategory};
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

/// Tasks on the critical path with at least this many dependents are
/// reported as complexity-adjacent "bottleneck" findings by the caller —
/// not this module's concern; kept here only as a cross-reference note.
const COMPLEXITY_BAND_OK: u32 = 5;
const COMPLEXITY_BAND_MEDIUM: u32 = 10;
const COMPLEXITY_BAND_HIGH: u32 = 20;
const COMPLEXITY_BAND_URGENT: u32 = 50;

const FUNCTION_LENGTH_MEDIUM: usize = 50;
const FUNCTION_LENGTH_HIGH: usize = 100;

/// Whether a gate applies to a category, per spec.md §4.4's matrix.
fn gate_applies(category: TaskCategory, gate: QualityGateType) -> bool {
    use QualityGateType::*;
    use TaskCategory::*;
    match category {
        CodeImplementation | Refactoring | Mixed => true,
        Design => gate == CodeReview,
        Documentation => gate == Linting,
        Configuration => matches!(gate, TypeCheck | Linting),
        Testing => matches!(gate, Tests | Coverage | SkipDetection),
    }
}

fn skip_reason(category: TaskCategory, gate: QualityGateType) -> String {
    match category {
        TaskCategory::Design => match gate {
            QualityGateType::CodeReview => String::new(),
            _ => "design tasks do not produce executable code".to_string(),
        },
        TaskCategory::Documentation => match gate {
            QualityGateType::Linting => String::new(),
            _ => "documentation tasks do not produce executable code".to_string(),
        },
        TaskCategory::Configuration => match gate {
            QualityGateType::TypeCheck | QualityGateType::Linting => String::new(),
            _ => "configuration tasks are not unit-testable in isolation".to_string(),
        },
        TaskCategory::Testing => match gate {
            QualityGateType::Tests | QualityGateType::Coverage | QualityGateType::SkipDetection => {
                String::new()
            }
            _ => "testing tasks are evaluated on test outcomes, not type/lint/review".to_string(),
        },
        TaskCategory::CodeImplementation | TaskCategory::Refactoring | TaskCategory::Mixed => {
            String::new()
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub gate: QualityGateType,
    pub applicable: bool,
    pub passed: bool,
    pub skip_reason: Option<String>,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    ApprovedExcellent,
    ApprovedWithSuggestions,
    ChangesRequested,
    Rejected,
}

impl ReviewDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, ReviewDecision::ApprovedExcellent | ReviewDecision::ApprovedWithSuggestions)
    }
}

#[derive(Debug, Clone)]
pub struct ReviewScore {
    pub complexity: f64,
    pub security: f64,
    pub style: f64,
    pub coverage: f64,
    pub combined: f64,
    pub decision: ReviewDecision,
}

/// Inputs a caller can supply for the gates this crate cannot execute
/// itself (the real type-checker/linter belong to the target project's own
/// toolchain, which is out of scope here — spec.md §1). `source_text` feeds
/// the review gate's complexity/security scan; `evidence` feeds
/// tests/coverage/skip_detection.
#[derive(Debug, Clone, Default)]
pub struct GateInputs<'a> {
    pub evidence: Option<&'a Evidence>,
    pub source_text: Option<&'a str>,
    pub file_path: Option<&'a str>,
    pub type_check_passed: Option<bool>,
    pub lint_passed: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct QualityGateReport {
    pub category: TaskCategory,
    pub outcomes: Vec<GateOutcome>,
    pub review_score: Option<ReviewScore>,
    pub all_passed: bool,
    /// Formatted question text for a SYNC blocker; `None` when every
    /// applicable gate passed.
    pub blocker_message: Option<String>,
}

#[derive(Default)]
pub struct QualityGateRunner;

impl QualityGateRunner {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, category: TaskCategory, inputs: &GateInputs) -> QualityGateReport {
        let mut outcomes = Vec::new();
        let mut review_score = None;

        for gate in QualityGateType::ALL {
            if !gate_applies(category, gate) {
                outcomes.push(GateOutcome {
                    gate,
                    applicable: false,
                    passed: true,
                    skip_reason: Some(skip_reason(category, gate)),
                    findings: vec![],
                });
                continue;
            }

            let outcome = match gate {
                QualityGateType::Tests => run_tests_gate(inputs),
                QualityGateType::Coverage => run_coverage_gate(inputs),
                QualityGateType::SkipDetection => run_skip_detection_gate(inputs),
                QualityGateType::TypeCheck => run_bool_gate(gate, inputs.type_check_passed),
                QualityGateType::Linting => run_bool_gate(gate, inputs.lint_passed),
                QualityGateType::CodeReview => {
                    let (outcome, score) = run_code_review_gate(inputs);
                    review_score = Some(score);
                    outcome
                }
            };
            outcomes.push(outcome);
        }

        let all_passed = outcomes.iter().all(|o| o.passed);
        let blocker_message = if all_passed {
            None
        } else {
            Some(format_blocker_message(&outcomes, review_score.as_ref()))
        };

        QualityGateReport {
            category,
            outcomes,
            review_score,
            all_passed,
            blocker_message,
        }
    }
}

fn run_tests_gate(inputs: &GateInputs) -> GateOutcome {
    match inputs.evidence {
        Some(evidence) => GateOutcome {
            gate: QualityGateType::Tests,
            applicable: true,
            passed: evidence.verified && evidence.failed_tests == 0,
            skip_reason: None,
            findings: vec![],
        },
        None => GateOutcome {
            gate: QualityGateType::Tests,
            applicable: true,
            passed: false,
            skip_reason: None,
            findings: vec![no_evidence_finding(FindingCategory::Maintainability, "tests")],
        },
    }
}

fn run_coverage_gate(inputs: &GateInputs) -> GateOutcome {
    match inputs.evidence.and_then(|e| e.coverage_percent) {
        Some(coverage) => GateOutcome {
            gate: QualityGateType::Coverage,
            applicable: true,
            passed: coverage >= 85.0,
            skip_reason: None,
            findings: vec![],
        },
        None => GateOutcome {
            gate: QualityGateType::Coverage,
            applicable: true,
            passed: false,
            skip_reason: None,
            findings: vec![no_evidence_finding(FindingCategory::Maintainability, "coverage")],
        },
    }
}

fn run_skip_detection_gate(inputs: &GateInputs) -> GateOutcome {
    match inputs.evidence {
        Some(evidence) => GateOutcome {
            gate: QualityGateType::SkipDetection,
            applicable: true,
            passed: evidence.skip_violations.is_empty(),
            skip_reason: None,
            findings: evidence
                .skip_violations
                .iter()
                .map(|v| Finding {
                    category: FindingCategory::Maintainability,
                    severity: Severity::Medium,
                    file_path: inputs.file_path.unwrap_or("unknown").to_string(),
                    line_number: None,
                    message: format!("Skipped test violation: {}", v),
                    suggestion: Some("Remove skip markers or justify them explicitly".to_string()),
                    tool: "skip_detection".to_string(),
                })
                .collect(),
        },
        None => GateOutcome {
            gate: QualityGateType::SkipDetection,
            applicable: true,
            passed: false,
            skip_reason: None,
            findings: vec![no_evidence_finding(FindingCategory::Maintainability, "skip detection")],
        },
    }
}

fn run_bool_gate(gate: QualityGateType, passed: Option<bool>) -> GateOutcome {
    match passed {
        Some(passed) => GateOutcome {
            gate,
            applicable: true,
            passed,
            skip_reason: None,
            findings: vec![],
        },
        None => GateOutcome {
            gate,
            applicable: true,
            passed: false,
            skip_reason: None,
            findings: vec![no_evidence_finding(FindingCategory::Maintainability, gate.as_str())],
        },
    }
}

fn no_evidence_finding(category: FindingCategory, gate_name: &str) -> Finding {
    Finding {
        category,
        severity: Severity::Medium,
        file_path: "unknown".to_string(),
        line_number: None,
        message: format!("No evidence supplied for the {} gate", gate_name),
        suggestion: Some("Run the task's test/build pipeline and attach evidence".to_string()),
        tool: gate_name.to_string(),
    }
}

fn run_code_review_gate(inputs: &GateInputs) -> (GateOutcome, ReviewScore) {
    let source = inputs.source_text.unwrap_or("");
    let file_path = inputs.file_path.unwrap_or("unknown").to_string();

    let mut findings = Vec::new();
    findings.extend(safety_scan(source, &file_path));

    let (complexity_score, complexity_findings) = score_complexity(source, &file_path);
    findings.extend(complexity_findings);

    let (security_score, security_findings) = score_security(source, &file_path);
    findings.extend(security_findings);

    let style_score = score_style(source);
    let coverage_score = inputs
        .evidence
        .and_then(|e| e.coverage_percent)
        .unwrap_or(0.0)
        .min(100.0);

    let combined =
        (0.3 * complexity_score + 0.4 * security_score + 0.2 * style_score + 0.1 * coverage_score)
            .clamp(0.0, 100.0);
    let combined = (combined * 10.0).round() / 10.0;

    let has_critical = findings.iter().any(|f| f.severity == Severity::Critical);
    let decision = if has_critical {
        ReviewDecision::Rejected
    } else if combined >= 90.0 {
        ReviewDecision::ApprovedExcellent
    } else if combined >= 70.0 {
        ReviewDecision::ApprovedWithSuggestions
    } else if combined >= 50.0 {
        ReviewDecision::ChangesRequested
    } else {
        ReviewDecision::Rejected
    };

    let score = ReviewScore {
        complexity: complexity_score,
        security: security_score,
        style: style_score,
        coverage: coverage_score,
        combined,
        decision,
    };

    let outcome = GateOutcome {
        gate: QualityGateType::CodeReview,
        applicable: true,
        passed: decision.is_approved(),
        skip_reason: None,
        findings,
    };

    (outcome, score)
}

/// Cyclomatic-complexity heuristic: one decision point per branch-
/// introducing token, plus a base of 1, banded per spec.md §4.4.
fn cyclomatic_complexity(source: &str) -> u32 {
    fn pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            RegexBuilder::new(r"\b(if|else\s+if|match|for|while|catch)\b|&&|\|\||\?")
                .build()
                .unwrap()
        })
    }
    1 + pattern().find_iter(source).count() as u32
}

fn complexity_band(score: u32) -> (Severity, &'static str) {
    if score <= COMPLEXITY_BAND_OK {
        (Severity::Info, "ok")
    } else if score <= COMPLEXITY_BAND_MEDIUM {
        (Severity::Medium, "medium")
    } else if score <= COMPLEXITY_BAND_HIGH {
        (Severity::High, "high")
    } else if score <= COMPLEXITY_BAND_URGENT {
        (Severity::High, "high (urgent)")
    } else {
        (Severity::Critical, "critical")
    }
}

fn score_complexity(source: &str, file_path: &str) -> (f64, Vec<Finding>) {
    if source.is_empty() {
        return (100.0, vec![]);
    }
    let complexity = cyclomatic_complexity(source);
    let (severity, band) = complexity_band(complexity);
    let mut findings = Vec::new();

    if severity >= Severity::Medium {
        findings.push(Finding {
            category: FindingCategory::Complexity,
            severity,
            file_path: file_path.to_string(),
            line_number: None,
            message: format!("Cyclomatic complexity {} ({})", complexity, band),
            suggestion: Some("Extract smaller functions to reduce branching".to_string()),
            tool: "complexity_analyzer".to_string(),
        });
    }

    let line_count = source.lines().count();
    if line_count > FUNCTION_LENGTH_HIGH {
        findings.push(Finding {
            category: FindingCategory::Complexity,
            severity: Severity::High,
            file_path: file_path.to_string(),
            line_number: None,
            message: format!("Source block is {} lines long", line_count),
            suggestion: Some("Split into smaller units".to_string()),
            tool: "complexity_analyzer".to_string(),
        });
    } else if line_count > FUNCTION_LENGTH_MEDIUM {
        findings.push(Finding {
            category: FindingCategory::Complexity,
            severity: Severity::Medium,
            file_path: file_path.to_string(),
            line_number: None,
            message: format!("Source block is {} lines long", line_count),
            suggestion: Some("Consider splitting into smaller units".to_string()),
            tool: "complexity_analyzer".to_string(),
        });
    }

    let score = match complexity {
        0..=COMPLEXITY_BAND_OK => 100.0,
        v if v <= COMPLEXITY_BAND_MEDIUM => 80.0,
        v if v <= COMPLEXITY_BAND_HIGH => 55.0,
        v if v <= COMPLEXITY_BAND_URGENT => 30.0,
        _ => 10.0,
    };
    (score, findings)
}

struct SecurityPattern {
    id: &'static str,
    regex: &'static str,
    message: &'static str,
    severity: Severity,
    suggestion: &'static str,
}

/// OWASP-overlay pattern table (spec.md §4.4). Ported from a bandit/rule-id
/// keyed suggestion table to a pattern-keyed one, since there is no bandit
/// equivalent in this ecosystem.
const SECURITY_PATTERNS: &[SecurityPattern] = &[
    SecurityPattern {
        id: "sql_string_building",
        regex: r#"(?i)(SELECT|INSERT|UPDATE|DELETE)\s.*["'].*\+|format!\(\s*"[^"]*\b(SELECT|INSERT|UPDATE|DELETE)\b"#,
        message: "Possible SQL built via string concatenation",
        severity: Severity::Critical,
        suggestion: "Use parameterized queries / a query builder",
    },
    SecurityPattern {
        id: "eval_usage",
        regex: r"\beval\s*\(",
        message: "Use of eval()-style dynamic code execution",
        severity: Severity::Critical,
        suggestion: "Avoid dynamic code execution; use explicit dispatch",
    },
    SecurityPattern {
        id: "shell_with_variables",
        regex: r#"(?i)(Command::new\(\s*"sh"|Command::new\(\s*"bash"|process\.Command\().*\$\{?\w+"#,
        message: "Shell invocation appears to interpolate a variable",
        severity: Severity::High,
        suggestion: "Avoid shell=true with interpolated input; use argv form",
    },
    SecurityPattern {
        id: "weak_password_length",
        regex: r"(?i)password.{0,20}\.len\(\)\s*[<>]=?\s*[1-7]\b",
        message: "Password length check allows weak (<8 char) passwords",
        severity: Severity::Medium,
        suggestion: "Require a minimum of 8 characters",
    },
];

fn hardcoded_credential_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        RegexBuilder::new(r#"(?i)\b(password|api_key|secret|token)\s*[:=]\s*["']([^"']+)["']"#)
            .build()
            .unwrap()
    })
}

const CREDENTIAL_ALLOWLIST: &[&str] = &["test", "example", "dummy", "mock", "placeholder"];

fn score_security(source: &str, file_path: &str) -> (f64, Vec<Finding>) {
    let mut findings = Vec::new();

    for (line_no, line) in source.lines().enumerate() {
        for pattern in SECURITY_PATTERNS {
            if let Ok(re) = RegexBuilder::new(pattern.regex).build() {
                if re.is_match(line) {
                    findings.push(Finding {
                        category: FindingCategory::Security,
                        severity: pattern.severity,
                        file_path: file_path.to_string(),
                        line_number: Some(line_no as u32 + 1),
                        message: pattern.message.to_string(),
                        suggestion: Some(pattern.suggestion.to_string()),
                        tool: pattern.id.to_string(),
                    });
                }
            }
        }

        if let Some(caps) = hardcoded_credential_pattern().captures(line) {
            let value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let lowered = line.to_lowercase();
            let allowlisted = CREDENTIAL_ALLOWLIST.iter().any(|w| lowered.contains(w));
            if !value.is_empty() && !allowlisted {
                findings.push(Finding {
                    category: FindingCategory::Security,
                    severity: Severity::High,
                    file_path: file_path.to_string(),
                    line_number: Some(line_no as u32 + 1),
                    message: "Hardcoded credential assignment".to_string(),
                    suggestion: Some("Load secrets from environment or a secret store".to_string()),
                    tool: "hardcoded_credentials".to_string(),
                });
            }
        }
    }

    let worst = findings.iter().map(|f| f.severity).max();
    let score = match worst {
        None => 100.0,
        Some(Severity::Critical) => 20.0,
        Some(Severity::High) => 45.0,
        Some(Severity::Medium) => 70.0,
        Some(Severity::Low) => 85.0,
        Some(Severity::Info) => 95.0,
    };
    (score, findings)
}

/// Maps an external scanner's severity (spec.md §4.4) to this crate's
/// `Severity` enum. Exposed for callers that plug in a real scanner instead
/// of (or in addition to) the pattern scan above.
pub fn severity_from_external(level: &str) -> Option<Severity> {
    match level.to_uppercase().as_str() {
        "HIGH" => Some(Severity::Critical),
        "MEDIUM" => Some(Severity::High),
        "LOW" => Some(Severity::Medium),
        _ => None,
    }
}

fn score_style(source: &str) -> f64 {
    if source.is_empty() {
        return 100.0;
    }
    let long_lines = source.lines().filter(|l| l.len() > 120).count();
    let total_lines = source.lines().count().max(1);
    let ratio = long_lines as f64 / total_lines as f64;
    (100.0 - ratio * 100.0).max(40.0)
}

/// Pre-gate safety scan over agent-produced diffs: flags `unsafe` blocks,
/// subprocess spawning, filesystem deletion, network access, and build
/// script / proc-macro edits as warnings attached to the review findings.
fn safety_scan(source: &str, file_path: &str) -> Vec<Finding> {
    const SAFETY_MARKERS: &[(&str, &str, Severity)] = &[
        ("unsafe", r"\bunsafe\s*\{", Severity::High),
        ("subprocess_spawn", r"std::process::Command", Severity::Medium),
        ("fs_deletion", r"std::fs::remove_(file|dir)", Severity::Medium),
        (
            "network_access",
            r"(TcpStream::connect|reqwest::|hyper::Client)",
            Severity::Low,
        ),
    ];

    let mut findings = Vec::new();
    for (id, pattern, severity) in SAFETY_MARKERS {
        if let Ok(re) = Regex::new(pattern) {
            if re.is_match(source) {
                findings.push(Finding {
                    category: FindingCategory::Security,
                    severity: *severity,
                    file_path: file_path.to_string(),
                    line_number: None,
                    message: format!("Generated code touches a safety-sensitive surface: {}", id),
                    suggestion: Some("Confirm this surface is required and reviewed".to_string()),
                    tool: "safety_scan".to_string(),
                });
            }
        }
    }
    if file_path.ends_with("build.rs") || file_path.contains("proc-macro") {
        findings.push(Finding {
            category: FindingCategory::Security,
            severity: Severity::Medium,
            file_path: file_path.to_string(),
            line_number: None,
            message: "Edits a build script or proc-macro crate".to_string(),
            suggestion: Some("Build scripts run arbitrary code at compile time; review carefully".to_string()),
            tool: "safety_scan".to_string(),
        });
    }
    findings
}

fn format_blocker_message(outcomes: &[GateOutcome], review_score: Option<&ReviewScore>) -> String {
    let mut lines = vec!["Quality gates failed:".to_string()];
    for outcome in outcomes {
        if !outcome.applicable || outcome.passed {
            continue;
        }
        lines.push(format!("- {}: FAILED", outcome.gate.as_str()));
        for finding in &outcome.findings {
            lines.push(format!(
                "  [{:?}/{:?}] {}:{} {} ({})",
                finding.severity,
                finding.category,
                finding.file_path,
                finding
                    .line_number
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".to_string()),
                finding.message,
                finding.tool
            ));
        }
    }
    if let Some(score) = review_score {
        lines.push(format!(
            "Review score: {:.1} (complexity {:.1}, security {:.1}, style {:.1}, coverage {:.1}) -> {:?}",
            score.combined, score.complexity, score.security, score.style, score.coverage, score.decision
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn design_task_only_runs_code_review() {
        let runner = QualityGateRunner::new();
        let report = runner.run(
            TaskCategory::Design,
            &GateInputs {
                source_text: Some("design notes, no branches here"),
                file_path: Some("DESIGN.md"),
                ..Default::default()
            },
        );
        let review = report
            .outcomes
            .iter()
            .find(|o| o.gate == QualityGateType::CodeReview)
            .unwrap();
        assert!(review.applicable);

        let skipped_tests = report
            .outcomes
            .iter()
            .find(|o| o.gate == QualityGateType::Tests)
            .unwrap();
        assert!(!skipped_tests.applicable);
        assert!(skipped_tests.skip_reason.as_ref().unwrap().contains("executable code"));
    }

    #[test]
    fn low_review_score_triggers_changes_requested() {
        // Forces complexity medium (score 80), security high-severity shell-with-variable
        // finding (score 45), style 100 (no long lines), coverage 0 (no evidence):
        // 0.3*80 + 0.4*45 + 0.2*100 + 0.1*0 = 62.0
        let source = "if a { if b { if c { if d { if e { if f {} } } } } }\nCommand::new(\"sh\").arg(format!(\"{} $HOME\", x));";
        let runner = QualityGateRunner::new();
        let report = runner.run(
            TaskCategory::CodeImplementation,
            &GateInputs {
                source_text: Some(source),
                file_path: Some("src/lib.rs"),
                type_check_passed: Some(true),
                lint_passed: Some(true),
                evidence: None,
                ..Default::default()
            },
        );
        let score = report.review_score.unwrap();
        assert!(matches!(
            score.decision,
            ReviewDecision::ChangesRequested | ReviewDecision::Rejected
        ));
        assert!(!report.all_passed);
        assert!(report.blocker_message.is_some());
    }

    #[test]
    fn credential_allowlist_excludes_test_lines() {
        let source = "let password = \"test_password_value\";";
        let (_, findings) = score_security(source, "src/auth.rs");
        assert!(findings.iter().all(|f| f.tool != "hardcoded_credentials"));
    }

    #[test]
    fn credential_without_allowlist_flagged() {
        let source = "let api_key = \"sk-abc123def456\";";
        let (_, findings) = score_security(source, "src/auth.rs");
        assert!(findings.iter().any(|f| f.tool == "hardcoded_credentials"));
    }

    #[test]
    fn empty_string_credential_not_flagged() {
        let source = "let api_key = \"\";";
        let (_, findings) = score_security(source, "src/auth.rs");
        assert!(findings.iter().all(|f| f.tool != "hardcoded_credentials"));
    }
}
