//! Runs a project's test suite and parses its output (spec.md §4.9).
//!
//! Shell use is off by default: the chosen command is tokenised into argv
//! and run directly. If the command string contains a shell operator it is
//! instead run through `sh -c` with a logged warning, since a handful of
//! framework invocations (notably some `npm test -- --coverage` variants)
//! only work that way.

use crate::evidence::TestOutcome;
use crate::language_probe::Language;
use crate::{Result, SpiralError};
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;

/// Wall-clock budget for a single test run, per spec.md §4.9.
const TEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const SHELL_OPERATORS: &[&str] = &[";", "&&", "||", "|", "`", "$(", ">", "<", ">>"];

fn contains_shell_operator(command: &str) -> bool {
    SHELL_OPERATORS.iter().any(|op| command.contains(op))
}

/// Tokenises a command string on whitespace, respecting simple single/double
/// quoting. Good enough for the fixed command strings this module builds
/// itself; not a general shell-quoting parser.
fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// The command a framework is conventionally invoked with; callers may
/// override via [`TestRunner::run_command`].
pub fn default_command_for(language: Language, framework: Option<&str>) -> String {
    match (language, framework) {
        (Language::Python, Some("pytest")) => "pytest --cov --cov-report=term".to_string(),
        (Language::Python, _) => "python -m unittest discover".to_string(),
        (Language::JavaScript | Language::TypeScript, Some("jest")) => "npx jest --coverage".to_string(),
        (Language::JavaScript | Language::TypeScript, Some("vitest")) => "npx vitest run --coverage".to_string(),
        (Language::JavaScript | Language::TypeScript, Some("mocha")) => "npx mocha".to_string(),
        (Language::JavaScript | Language::TypeScript, _) => "npm test".to_string(),
        (Language::Go, _) => "go test ./... -cover".to_string(),
        (Language::Rust, _) => "cargo test".to_string(),
        (Language::Java, Some("maven")) => "mvn test".to_string(),
        (Language::Java, _) => "gradle test".to_string(),
        (Language::Ruby, _) => "bundle exec rspec".to_string(),
        (Language::CSharp, _) => "dotnet test".to_string(),
    }
}

#[derive(Default)]
pub struct TestRunner;

impl TestRunner {
    pub fn new() -> Self {
        Self
    }

    /// Runs the framework's conventional test command in `project_dir`.
    pub async fn run(
        &self,
        project_dir: &Path,
        language: Language,
        framework: Option<&str>,
    ) -> Result<TestOutcome> {
        let command = default_command_for(language, framework);
        self.run_command(project_dir, &command, language).await
    }

    /// Runs an explicit command string and parses its output for `language`.
    pub async fn run_command(
        &self,
        project_dir: &Path,
        command: &str,
        language: Language,
    ) -> Result<TestOutcome> {
        let output = if contains_shell_operator(command) {
            tracing::warn!(command, "test command contains a shell operator; falling back to shell");
            run_via_shell(project_dir, command).await?
        } else {
            let tokens = tokenize(command);
            let (program, args) = tokens
                .split_first()
                .ok_or_else(|| SpiralError::Validation("empty test command".to_string()))?;
            run_argv(project_dir, program, args).await?
        };

        let mut outcome = parse_output(language, &output);
        outcome.raw_output = output;
        Ok(outcome)
    }

    /// Scans `source` for per-language skip markers, returning the matching
    /// lines as violations (spec.md §4.9).
    pub fn scan_skip_violations(&self, language: Language, source: &str) -> Vec<String> {
        skip_pattern(language)
            .find_iter(source)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

async fn run_argv(project_dir: &Path, program: &str, args: &[String]) -> Result<String> {
    let future = Command::new(program)
        .args(args)
        .current_dir(project_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .map_err(|_| SpiralError::Timeout {
            message: format!("test command '{} {}' exceeded {:?}", program, args.join(" "), TEST_TIMEOUT),
        })?
        .map_err(|e| SpiralError::Internal(anyhow::anyhow!("spawning test command: {}", e)))?;

    Ok(format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    ))
}

async fn run_via_shell(project_dir: &Path, command: &str) -> Result<String> {
    let future = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(project_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .map_err(|_| SpiralError::Timeout {
            message: format!("test command '{}' exceeded {:?}", command, TEST_TIMEOUT),
        })?
        .map_err(|e| SpiralError::Internal(anyhow::anyhow!("spawning shell test command: {}", e)))?;

    Ok(format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    ))
}

fn parse_output(language: Language, output: &str) -> TestOutcome {
    match language {
        Language::Python => parse_pytest(output),
        Language::JavaScript | Language::TypeScript => parse_jest_like(output),
        Language::Go => parse_go_test(output),
        Language::Rust => parse_cargo_test(output),
        Language::Java => parse_maven_gradle(output),
        Language::Ruby => parse_rspec(output),
        Language::CSharp => parse_dotnet_test(output),
    }
}

fn cached<F: Fn() -> Regex>(cell: &'static OnceLock<Regex>, build: F) -> &'static Regex {
    cell.get_or_init(build)
}

macro_rules! regex_fn {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static PATTERN: OnceLock<Regex> = OnceLock::new();
            cached(&PATTERN, || Regex::new($pattern).unwrap())
        }
    };
}

// pytest: "12 passed, 2 failed, 1 skipped in 3.21s" / coverage "TOTAL ... 87%"
regex_fn!(pytest_summary, r"(\d+)\s+passed(?:,\s*(\d+)\s+failed)?(?:,\s*(\d+)\s+skipped)?");
regex_fn!(pytest_failed_only, r"^(\d+)\s+failed");
regex_fn!(pytest_coverage, r"TOTAL\s+\d+\s+\d+\s+(\d+)%");

fn parse_pytest(output: &str) -> TestOutcome {
    let mut outcome = TestOutcome::default();
    if let Some(caps) = pytest_summary().captures(output) {
        let passed: u32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let failed: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let skipped: u32 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.passed = passed;
        outcome.failed = failed;
        outcome.skipped = skipped;
        outcome.total = passed + failed + skipped;
    } else if let Some(caps) = pytest_failed_only().captures(output.trim()) {
        outcome.failed = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.total = outcome.failed;
    }
    outcome.coverage_percent = pytest_coverage()
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());
    outcome
}

// jest/vitest/mocha: "Tests: 2 failed, 18 passed, 20 total" / mocha "20 passing" "2 failing"
regex_fn!(jest_summary, r"Tests:\s*(?:(\d+)\s+failed,\s*)?(?:(\d+)\s+skipped,\s*)?(\d+)\s+passed,\s*(\d+)\s+total");
regex_fn!(mocha_passing, r"(\d+)\s+passing");
regex_fn!(mocha_failing, r"(\d+)\s+failing");
regex_fn!(mocha_pending, r"(\d+)\s+pending");
regex_fn!(jest_coverage, r"All files[^\n|]*\|\s*([\d.]+)");

fn parse_jest_like(output: &str) -> TestOutcome {
    let mut outcome = TestOutcome::default();
    if let Some(caps) = jest_summary().captures(output) {
        outcome.failed = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.skipped = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.passed = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.total = caps.get(4).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    } else {
        let passed = mocha_passing().captures(output).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let failed = mocha_failing().captures(output).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let pending = mocha_pending().captures(output).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.passed = passed;
        outcome.failed = failed;
        outcome.skipped = pending;
        outcome.total = passed + failed + pending;
    }
    outcome.coverage_percent = jest_coverage()
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());
    outcome
}

// go test: "ok   pkg   0.123s  coverage: 87.3% of statements" / "--- FAIL:" lines
regex_fn!(go_fail_lines, r"(?m)^--- FAIL:");
regex_fn!(go_pass_lines, r"(?m)^--- PASS:");
regex_fn!(go_skip_lines, r"(?m)^--- SKIP:");
regex_fn!(go_coverage, r"coverage:\s*([\d.]+)%\s*of statements");

fn parse_go_test(output: &str) -> TestOutcome {
    let passed = go_pass_lines().find_iter(output).count() as u32;
    let failed = go_fail_lines().find_iter(output).count() as u32;
    let skipped = go_skip_lines().find_iter(output).count() as u32;
    TestOutcome {
        total: passed + failed + skipped,
        passed,
        failed,
        skipped,
        coverage_percent: go_coverage().captures(output).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok()),
        raw_output: String::new(),
    }
}

// cargo test: "test result: ok. 12 passed; 0 failed; 1 ignored; ..."
regex_fn!(cargo_summary, r"test result:\s*\w+\.\s*(\d+)\s*passed;\s*(\d+)\s*failed;\s*(\d+)\s*ignored");
regex_fn!(cargo_coverage, r"(\d+\.\d+)%\s*coverage");

fn parse_cargo_test(output: &str) -> TestOutcome {
    let mut passed = 0;
    let mut failed = 0;
    let mut ignored = 0;
    for caps in cargo_summary().captures_iter(output) {
        passed += caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0);
        failed += caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0);
        ignored += caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0);
    }
    TestOutcome {
        total: passed + failed + ignored,
        passed,
        failed,
        skipped: ignored,
        coverage_percent: cargo_coverage().captures(output).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok()),
        raw_output: String::new(),
    }
}

// maven/gradle: "Tests run: 42, Failures: 1, Errors: 0, Skipped: 2"
regex_fn!(maven_summary, r"Tests run:\s*(\d+),\s*Failures:\s*(\d+),\s*Errors:\s*(\d+),\s*Skipped:\s*(\d+)");
regex_fn!(jacoco_coverage, r"Total[^\d]*(\d+)%");

fn parse_maven_gradle(output: &str) -> TestOutcome {
    let mut total = 0;
    let mut failed = 0;
    let mut skipped = 0;
    for caps in maven_summary().captures_iter(output) {
        let run: u32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let failures: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let errors: u32 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let skip: u32 = caps.get(4).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        total += run;
        failed += failures + errors;
        skipped += skip;
    }
    TestOutcome {
        total,
        passed: total.saturating_sub(failed).saturating_sub(skipped),
        failed,
        skipped,
        coverage_percent: jacoco_coverage().captures(output).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok()),
        raw_output: String::new(),
    }
}

// rspec: "42 examples, 2 failures, 1 pending"
regex_fn!(rspec_summary, r"(\d+)\s+examples?,\s*(\d+)\s+failures?(?:,\s*(\d+)\s+pending)?");
regex_fn!(simplecov_coverage, r"(\d+\.\d+)%\s*covered");

fn parse_rspec(output: &str) -> TestOutcome {
    let mut outcome = TestOutcome::default();
    if let Some(caps) = rspec_summary().captures(output) {
        let total: u32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let failed: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let pending: u32 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.total = total;
        outcome.failed = failed;
        outcome.skipped = pending;
        outcome.passed = total.saturating_sub(failed).saturating_sub(pending);
    }
    outcome.coverage_percent = simplecov_coverage()
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    outcome
}

// dotnet test: "Passed!  - Failed: 0, Passed: 42, Skipped: 1, Total: 43"
regex_fn!(dotnet_summary, r"Failed:\s*(\d+),\s*Passed:\s*(\d+),\s*Skipped:\s*(\d+),\s*Total:\s*(\d+)");

fn parse_dotnet_test(output: &str) -> TestOutcome {
    let mut outcome = TestOutcome::default();
    if let Some(caps) = dotnet_summary().captures(output) {
        outcome.failed = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.passed = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.skipped = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        outcome.total = caps.get(4).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    }
    outcome
}

fn skip_pattern(language: Language) -> &'static Regex {
    macro_rules! lang_pattern {
        ($cell:ident, $pattern:expr) => {{
            static PATTERN: OnceLock<Regex> = OnceLock::new();
            PATTERN.get_or_init(|| Regex::new($pattern).unwrap())
        }};
    }
    match language {
        Language::Python => lang_pattern!(P, r"@pytest\.mark\.skip(?:if)?\([^)]*\)|@unittest\.skip\([^)]*\)"),
        Language::JavaScript | Language::TypeScript => lang_pattern!(J, r"\b(?:it|describe|test)\.skip\b|\bxit\b|\bxdescribe\b"),
        Language::Go => lang_pattern!(G, r"\bt\.Skip\("),
        Language::Rust => lang_pattern!(R, r"#\[ignore\]"),
        Language::Java => lang_pattern!(JV, r"@Ignore\b|@Disabled\b"),
        Language::Ruby => lang_pattern!(RB, r"\bskip\b|\bpending\b|\bxit\b"),
        Language::CSharp => lang_pattern!(CS, r"\[Ignore\]|\[Skip\]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_respects_quotes() {
        let tokens = tokenize(r#"npx jest --testPathPattern "src/foo bar.test.ts""#);
        assert_eq!(tokens, vec!["npx", "jest", "--testPathPattern", "src/foo bar.test.ts"]);
    }

    #[test]
    fn detects_shell_operator() {
        assert!(contains_shell_operator("npm test && echo done"));
        assert!(!contains_shell_operator("npm test --silent"));
    }

    #[test]
    fn parses_pytest_summary() {
        let output = "===== 8 passed, 2 failed, 1 skipped in 3.21s =====\nTOTAL 120 15 87%";
        let outcome = parse_pytest(output);
        assert_eq!(outcome.passed, 8);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.coverage_percent, Some(87.0));
    }

    #[test]
    fn parses_cargo_test_summary() {
        let output = "running 12 tests\ntest result: ok. 10 passed; 2 failed; 1 ignored; 0 measured; 0 filtered out";
        let outcome = parse_cargo_test(output);
        assert_eq!(outcome.passed, 10);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn parses_go_test_summary() {
        let output = "--- PASS: TestFoo (0.00s)\n--- PASS: TestBar (0.00s)\n--- FAIL: TestBaz (0.00s)\ncoverage: 77.5% of statements";
        let outcome = parse_go_test(output);
        assert_eq!(outcome.passed, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.coverage_percent, Some(77.5));
    }

    #[test]
    fn parses_jest_summary() {
        let output = "Tests: 1 failed, 2 skipped, 17 passed, 20 total\nAll files     |   91.2 |";
        let outcome = parse_jest_like(output);
        assert_eq!(outcome.passed, 17);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.total, 20);
    }

    #[test]
    fn scans_rust_ignore_markers() {
        let runner = TestRunner::new();
        let source = "#[test]\n#[ignore]\nfn slow() {}\n";
        let violations = runner.scan_skip_violations(Language::Rust, source);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn scans_python_skip_markers() {
        let runner = TestRunner::new();
        let source = "@pytest.mark.skip(reason=\"flaky\")\ndef test_x(): pass\n";
        let violations = runner.scan_skip_violations(Language::Python, source);
        assert_eq!(violations.len(), 1);
    }

    #[tokio::test]
    async fn run_command_executes_argv_without_shell() {
        let runner = TestRunner::new();
        let dir = tempfile::tempdir().unwrap();
        let outcome = runner
            .run_command(dir.path(), "echo test result: ok. 1 passed; 0 failed; 0 ignored;", Language::Rust)
            .await
            .unwrap();
        assert_eq!(outcome.passed, 1);
    }
}
