//! Gates task completion on empirical evidence rather than an agent's
//! self-report (spec.md §4.8).
//!
//! The verifier never trusts that a task is done because the agent says so;
//! it only trusts a [`TestOutcome`] produced by the [`crate::test_runner`].

use crate::config::EvidenceConfig;
use crate::models::Evidence;
use std::collections::HashMap;

/// Minimum length for `raw_output` to be considered present; anything
/// shorter is treated as missing/truncated test output.
const MIN_RAW_OUTPUT_LEN: usize = 10;

/// Parsed test-run result, as produced by [`crate::test_runner::TestRunner`].
#[derive(Debug, Clone, Default)]
pub struct TestOutcome {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub coverage_percent: Option<f64>,
    pub raw_output: String,
}

impl TestOutcome {
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.passed as f64 / self.total as f64 * 100.0
        }
    }
}

/// A self-reported discrepancy between an agent's claim and the verified
/// evidence.
#[derive(Debug, Clone)]
pub struct Discrepancy {
    pub field: String,
    pub claimed: String,
    pub actual: String,
}

#[derive(Debug, Default)]
pub struct EvidenceVerifier {
    config: EvidenceConfig,
}

impl EvidenceVerifier {
    pub fn new(config: EvidenceConfig) -> Self {
        Self { config }
    }

    /// Builds an [`Evidence`] envelope from a test outcome and skip scan,
    /// setting `verified` and `errors` per spec.md §4.8's defaults: require
    /// coverage, min_coverage 85%, disallow skipped tests, min_pass_rate
    /// 100% (all overridable via [`EvidenceConfig`]).
    pub fn verify(
        &self,
        outcome: &TestOutcome,
        skip_violations: Vec<String>,
        language: impl Into<String>,
        framework: Option<String>,
        agent_id: impl Into<String>,
        task_description: impl Into<String>,
    ) -> Evidence {
        let agent_id = agent_id.into();
        let mut errors = Vec::new();

        if outcome.raw_output.trim().len() < MIN_RAW_OUTPUT_LEN {
            errors.push("Test output missing or too short".to_string());
        }

        if outcome.failed > 0 {
            errors.push(format!("Tests failed: {} failures", outcome.failed));
        }

        let pass_rate = outcome.pass_rate();
        if pass_rate < self.config.min_pass_rate {
            errors.push(format!(
                "Pass rate too low: {:.1}% (min {:.1}%)",
                pass_rate, self.config.min_pass_rate
            ));
        }

        if self.config.require_coverage {
            match outcome.coverage_percent {
                None => errors.push("Coverage data missing (required)".to_string()),
                Some(coverage) if coverage < self.config.min_coverage => {
                    errors.push(format!(
                        "Coverage too low: {:.1}% (min {:.1}%)",
                        coverage, self.config.min_coverage
                    ));
                }
                Some(_) => {}
            }
        }

        if !self.config.allow_skipped_tests && outcome.skipped > 0 {
            errors.push(format!("Skipped tests detected: {}", outcome.skipped));
        }

        if !skip_violations.is_empty() {
            errors.push(format!(
                "Skip violations detected: {}",
                skip_violations.len()
            ));
        }

        let verified = errors.is_empty();
        if !verified {
            tracing::warn!(
                agent_id = %agent_id,
                error_count = errors.len(),
                "Evidence verification failed"
            );
        }

        let mut quality_metrics = HashMap::new();
        quality_metrics.insert("pass_rate".to_string(), pass_rate);
        if let Some(coverage) = outcome.coverage_percent {
            quality_metrics.insert("coverage".to_string(), coverage);
        }

        Evidence {
            total_tests: outcome.total,
            passed_tests: outcome.passed,
            failed_tests: outcome.failed,
            skipped_tests: outcome.skipped,
            pass_rate,
            coverage_percent: outcome.coverage_percent,
            raw_output: outcome.raw_output.clone(),
            skip_violations,
            quality_metrics,
            agent_id,
            task_description: task_description.into(),
            detected_language: language.into(),
            detected_framework: framework,
            verified,
            errors,
        }
    }

    /// Compares an agent's self-reported claim text against verified
    /// evidence, listing discrepancies a supervisor should surface rather
    /// than trust blindly.
    pub fn validate_claim(&self, claim: &str, evidence: &Evidence) -> Vec<Discrepancy> {
        let mut discrepancies = Vec::new();
        let claim_lower = claim.to_lowercase();

        let claims_passing = claim_lower.contains("all tests pass")
            || claim_lower.contains("tests passing")
            || claim_lower.contains("all tests passed");
        if claims_passing && evidence.failed_tests > 0 {
            discrepancies.push(Discrepancy {
                field: "tests_passed".to_string(),
                claimed: "all tests pass".to_string(),
                actual: format!("{} failing", evidence.failed_tests),
            });
        }

        let claims_complete = claim_lower.contains("complete")
            || claim_lower.contains("done")
            || claim_lower.contains("finished");
        if claims_complete && !evidence.verified {
            discrepancies.push(Discrepancy {
                field: "completion".to_string(),
                claimed: "task complete".to_string(),
                actual: format!("verification failed: {}", evidence.errors.join("; ")),
            });
        }

        if claim_lower.contains("100% coverage") {
            if let Some(coverage) = evidence.coverage_percent {
                if (coverage - 100.0).abs() > 0.01 {
                    discrepancies.push(Discrepancy {
                        field: "coverage".to_string(),
                        claimed: "100% coverage".to_string(),
                        actual: format!("{:.1}%", coverage),
                    });
                }
            }
        }

        discrepancies
    }

    /// Human-readable evidence summary plus a pass/fail banner, used in
    /// blocker question text (not load-bearing to the pass/fail decision).
    pub fn generate_report(&self, evidence: &Evidence) -> String {
        let banner = if evidence.verified {
            "EVIDENCE VERIFIED"
        } else {
            "EVIDENCE VERIFICATION FAILED"
        };
        let mut lines = vec![
            banner.to_string(),
            format!(
                "Tests: {}/{} passed, {} failed, {} skipped ({:.1}% pass rate)",
                evidence.passed_tests,
                evidence.total_tests,
                evidence.failed_tests,
                evidence.skipped_tests,
                evidence.pass_rate
            ),
        ];
        if let Some(coverage) = evidence.coverage_percent {
            lines.push(format!("Coverage: {:.1}%", coverage));
        } else {
            lines.push("Coverage: not reported".to_string());
        }
        if !evidence.skip_violations.is_empty() {
            lines.push(format!(
                "Skip violations: {}",
                evidence.skip_violations.join(", ")
            ));
        }
        if !evidence.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &evidence.errors {
                lines.push(format!("  - {}", err));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing_outcome() -> TestOutcome {
        TestOutcome {
            total: 10,
            passed: 10,
            failed: 0,
            skipped: 0,
            coverage_percent: Some(90.0),
            raw_output: "10 passed in 1.23s".to_string(),
        }
    }

    #[test]
    fn passing_evidence_is_verified() {
        let verifier = EvidenceVerifier::new(EvidenceConfig::default());
        let evidence = verifier.verify(&passing_outcome(), vec![], "rust", Some("cargo-test".into()), "agent-1", "task");
        assert!(evidence.verified);
        assert!(evidence.errors.is_empty());
    }

    #[test]
    fn failed_tests_block_verification() {
        let verifier = EvidenceVerifier::new(EvidenceConfig::default());
        let mut outcome = passing_outcome();
        outcome.passed = 8;
        outcome.failed = 2;
        let evidence = verifier.verify(&outcome, vec![], "rust", None, "agent-1", "task");
        assert!(!evidence.verified);
        assert!(evidence.errors.iter().any(|e| e.contains("Tests failed: 2")));
    }

    #[test]
    fn missing_coverage_blocks_when_required() {
        let verifier = EvidenceVerifier::new(EvidenceConfig::default());
        let mut outcome = passing_outcome();
        outcome.coverage_percent = None;
        let evidence = verifier.verify(&outcome, vec![], "rust", None, "agent-1", "task");
        assert!(!evidence.verified);
        assert!(evidence.errors.iter().any(|e| e.contains("Coverage data missing")));
    }

    #[test]
    fn low_coverage_blocks() {
        let verifier = EvidenceVerifier::new(EvidenceConfig::default());
        let mut outcome = passing_outcome();
        outcome.coverage_percent = Some(40.0);
        let evidence = verifier.verify(&outcome, vec![], "rust", None, "agent-1", "task");
        assert!(!evidence.verified);
        assert!(evidence.errors.iter().any(|e| e.contains("Coverage too low")));
    }

    #[test]
    fn skipped_tests_block_by_default() {
        let verifier = EvidenceVerifier::new(EvidenceConfig::default());
        let mut outcome = passing_outcome();
        outcome.skipped = 3;
        let evidence = verifier.verify(&outcome, vec![], "rust", None, "agent-1", "task");
        assert!(!evidence.verified);
        assert!(evidence.errors.iter().any(|e| e.contains("Skipped tests detected: 3")));
    }

    #[test]
    fn short_raw_output_is_flagged() {
        let verifier = EvidenceVerifier::new(EvidenceConfig::default());
        let mut outcome = passing_outcome();
        outcome.raw_output = "ok".to_string();
        let evidence = verifier.verify(&outcome, vec![], "rust", None, "agent-1", "task");
        assert!(evidence.errors.iter().any(|e| e.contains("too short")));
    }

    #[test]
    fn validate_claim_flags_false_completion() {
        let verifier = EvidenceVerifier::new(EvidenceConfig::default());
        let mut outcome = passing_outcome();
        outcome.failed = 1;
        let evidence = verifier.verify(&outcome, vec![], "rust", None, "agent-1", "task");
        let discrepancies = verifier.validate_claim("All tests pass, task complete", &evidence);
        assert!(discrepancies.iter().any(|d| d.field == "tests_passed"));
        assert!(discrepancies.iter().any(|d| d.field == "completion"));
    }

    #[test]
    fn generate_report_includes_banner_and_errors() {
        let verifier = EvidenceVerifier::new(EvidenceConfig::default());
        let mut outcome = passing_outcome();
        outcome.failed = 1;
        outcome.passed = 9;
        let evidence = verifier.verify(&outcome, vec![], "rust", None, "agent-1", "task");
        let report = verifier.generate_report(&evidence);
        assert!(report.contains("EVIDENCE VERIFICATION FAILED"));
        assert!(report.contains("Tests failed"));
    }
}
