//! Test runner: turns raw execution results into pass/fail verdicts.
//!
//! Test cases run one after another, in input order, so diagnostics stay
//! stable and a case never observes another case's side effects.

use std::{future::Future, time::Duration};

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::execution::ExecutionResult;

/// Per-test-case execution budget.
pub const TEST_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Code prepended to the learner's submission.
    #[serde(default, alias = "input", skip_serializing_if = "Option::is_none")]
    pub setup_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    /// Carried through from content; comparison only looks at stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<serde_json::Value>,
    #[serde(default)]
    pub hidden: bool,
}

impl TestCase {
    pub fn expecting(output: impl Into<String>) -> Self {
        Self { expected_output: Some(output.into()), ..Default::default() }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_setup(mut self, setup: impl Into<String>) -> Self {
        self.setup_code = Some(setup.into());
        self
    }

    /// The program actually submitted for this case.
    pub fn submission(&self, code: &str) -> String {
        match self.setup_code.as_deref() {
            Some(setup) => format!("{setup}\n{code}"),
            None => code.to_string(),
        }
    }

    fn expected(&self) -> String {
        self.expected_output.as_deref().unwrap_or_default().trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_case: TestCase,
    pub passed: bool,
    pub actual: String,
    pub expected: String,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunResult {
    pub all_passed: bool,
    pub results: Vec<TestResult>,
    pub visible_results: Vec<TestResult>,
}

impl TestRunResult {
    fn from_results(results: Vec<TestResult>) -> Self {
        let all_passed = results.iter().all(|r| r.passed);
        let visible_results = results.iter().filter(|r| !r.hidden).cloned().collect();
        Self { all_passed, results, visible_results }
    }

    pub fn failed_visible(&self) -> impl Iterator<Item = &TestResult> {
        self.visible_results.iter().filter(|r| !r.passed)
    }
}

/// Run every test case against `code` through `execute`.
pub async fn run_tests<F, Fut>(code: &str, test_cases: &[TestCase], execute: F) -> TestRunResult
where
    F: Fn(String, Duration) -> Fut,
    Fut: Future<Output = ExecutionResult>,
{
    let mut results = Vec::with_capacity(test_cases.len());
    for case in test_cases {
        let outcome = execute(case.submission(code), TEST_TIMEOUT).await;
        results.push(judge(case, &outcome));
    }
    TestRunResult::from_results(results)
}

/// Classify one execution against its test case.
pub fn judge(case: &TestCase, outcome: &ExecutionResult) -> TestResult {
    let expected = case.expected();
    if !outcome.success {
        let actual = outcome
            .error
            .clone()
            .filter(|e| !e.is_empty())
            .or_else(|| outcome.stderr.clone().filter(|e| !e.is_empty()))
            .unwrap_or_else(|| "Execution failed".to_string());
        return TestResult { test_case: case.clone(), passed: false, actual, expected, hidden: case.hidden };
    }

    let actual = outcome.stdout.as_deref().unwrap_or_default().trim().to_string();
    let (passed, actual) = match compare(&actual, &expected) {
        Ok(passed) => (passed, actual),
        Err(message) => (false, message),
    };
    TestResult { test_case: case.clone(), passed, actual, expected, hidden: case.hidden }
}

/// Literal equality, or a regex match when `expected` is written `/pattern/flags`.
///
/// An unusable pattern is an error carrying the reason.
pub fn compare(actual: &str, expected: &str) -> Result<bool, String> {
    match parse_pattern(expected) {
        Some((pattern, flags)) => {
            let ascii = ascii_classes(pattern);
            let source = if flags.contains('y') { format!(r"\A(?:{ascii})") } else { ascii };
            let re = RegexBuilder::new(&source)
                .case_insensitive(flags.contains('i'))
                .multi_line(flags.contains('m'))
                .dot_matches_new_line(flags.contains('s'))
                .build()
                .map_err(|e| format!("Invalid pattern /{pattern}/: {e}"))?;
            Ok(re.is_match(actual))
        }
        None => Ok(actual == expected),
    }
}

/// Rewrite `\d`, `\w` and `\b` (and their negations) to their ASCII forms.
///
/// The regex engine reads these as Unicode classes. Expectations are written
/// for ASCII semantics, so `/^\d+$/` must not accept Arabic-Indic digits. Other
/// escapes and Unicode literals are left alone.
fn ascii_classes(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut in_class = false;
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('d') => out.push_str("[0-9]"),
                Some('D') => out.push_str("[^0-9]"),
                Some('w') => out.push_str("[0-9A-Za-z_]"),
                Some('W') => out.push_str("[^0-9A-Za-z_]"),
                Some('b') if !in_class => out.push_str(r"(?-u:\b)"),
                Some('B') if !in_class => out.push_str(r"(?-u:\B)"),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '[' if !in_class => {
                in_class = true;
                out.push(c);
            }
            ']' if in_class => {
                in_class = false;
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Split `/pattern/flags` into its parts. Flags are any of `gimsuy`.
fn parse_pattern(expected: &str) -> Option<(&str, &str)> {
    let body = expected.strip_prefix('/')?;
    let end = body.rfind('/')?;
    let (pattern, flags) = (&body[..end], &body[end + 1..]);
    if pattern.is_empty() || !flags.chars().all(|c| "gimsuy".contains(c)) {
        return None;
    }
    Some((pattern, flags))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusObjective {
    pub description: String,
    pub test_case: TestCase,
    #[serde(default = "default_bonus_xp", rename = "bonusXP")]
    pub bonus_xp: u32,
}

fn default_bonus_xp() -> u32 {
    crate::progression::BONUS_OBJECTIVE_XP
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub bonus_objectives: Vec<BonusObjective>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeOutcome {
    pub tests: TestRunResult,
    /// One entry per bonus objective; empty unless every main test passed.
    pub bonus_passed: Vec<bool>,
}

impl ChallengeOutcome {
    pub fn passed(&self) -> bool {
        self.tests.all_passed
    }

    pub fn bonus_objectives_passed(&self) -> u32 {
        self.bonus_passed.iter().filter(|p| **p).count() as u32
    }
}

/// Grade a challenge; bonus objectives are only attempted once the main tests pass.
pub async fn run_challenge<F, Fut>(code: &str, challenge: &Challenge, execute: F) -> ChallengeOutcome
where
    F: Fn(String, Duration) -> Fut,
    Fut: Future<Output = ExecutionResult>,
{
    let tests = run_tests(code, &challenge.test_cases, &execute).await;
    let mut bonus_passed = Vec::new();
    if tests.all_passed {
        for bonus in &challenge.bonus_objectives {
            let run = run_tests(code, std::slice::from_ref(&bonus.test_case), &execute).await;
            bonus_passed.push(run.all_passed);
        }
    }
    ChallengeOutcome { tests, bonus_passed }
}
