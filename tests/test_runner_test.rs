use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use pyquest::{
    execution::{ExecutionFailure, ExecutionResult, LOOP_GUARD_MESSAGE},
    grader::{compare, run_challenge, run_tests, BonusObjective, Challenge, TestCase, TEST_TIMEOUT},
};

/// An executor that answers every submission with the same result and
/// remembers what it was asked to run.
fn canned(result: ExecutionResult) -> (impl Fn(String, Duration) -> std::future::Ready<ExecutionResult>, Arc<Mutex<Vec<(String, Duration)>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&calls);
    let execute = move |code: String, timeout: Duration| {
        seen.lock().unwrap().push((code, timeout));
        std::future::ready(result.clone())
    };
    (execute, calls)
}

/// Prints whatever follows `say ` on the last line of the submission.
fn echo(code: String, _timeout: Duration) -> std::future::Ready<ExecutionResult> {
    let said = code.lines().last().and_then(|l| l.strip_prefix("say ")).unwrap_or_default();
    std::future::ready(ExecutionResult::ok(format!("{said}\n")))
}

#[tokio::test]
async fn literal_match_ignores_surrounding_whitespace() {
    let (execute, calls) = canned(ExecutionResult::ok("4\n"));
    let report = run_tests("print(2 + 2)", &[TestCase::expecting("  4 ")], execute).await;
    assert!(report.all_passed);
    assert_eq!(report.results[0].actual, "4");
    assert_eq!(report.results[0].expected, "4");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], ("print(2 + 2)".to_string(), TEST_TIMEOUT));
    assert_eq!(TEST_TIMEOUT, Duration::from_millis(5000));
}

#[tokio::test]
async fn regex_expectation_matches() {
    let (execute, _) = canned(ExecutionResult::ok("42\n"));
    let report = run_tests("print(42)", &[TestCase::expecting(r"/^\d+$/")], execute).await;
    assert!(report.all_passed);

    let (execute, _) = canned(ExecutionResult::ok("forty-two\n"));
    let report = run_tests("print('forty-two')", &[TestCase::expecting(r"/^\d+$/")], execute).await;
    assert!(!report.all_passed);
    assert_eq!(report.results[0].actual, "forty-two");
}

#[tokio::test]
async fn failed_execution_reports_the_error() {
    let (execute, _) = canned(ExecutionResult {
        success: false,
        stdout: Some("partial\n".into()),
        stderr: Some("Traceback\n".into()),
        error: Some("NameError: name 'x' is not defined".into()),
        ..Default::default()
    });
    let report = run_tests("print(x)", &[TestCase::expecting("1")], execute).await;
    assert!(!report.all_passed);
    assert_eq!(report.results[0].actual, "NameError: name 'x' is not defined");

    let (execute, _) = canned(ExecutionResult {
        success: false,
        stderr: Some("boom".into()),
        ..Default::default()
    });
    let report = run_tests("x", &[TestCase::expecting("1")], execute).await;
    assert_eq!(report.results[0].actual, "boom");

    let (execute, _) = canned(ExecutionResult { success: false, ..Default::default() });
    let report = run_tests("x", &[TestCase::expecting("1")], execute).await;
    assert_eq!(report.results[0].actual, "Execution failed");
}

#[tokio::test]
async fn timeouts_and_loop_guard_fail_the_case() {
    let (execute, _) = canned(ExecutionResult::failed(ExecutionFailure::Timeout));
    let report = run_tests("while True: pass", &[TestCase::expecting("")], execute).await;
    assert!(!report.all_passed);
    assert_eq!(report.results[0].actual, "execution timed out");

    let (execute, _) = canned(ExecutionResult::failed(ExecutionFailure::LoopGuard));
    let report = run_tests("while True: pass", &[TestCase::expecting("")], execute).await;
    assert_eq!(report.results[0].actual, LOOP_GUARD_MESSAGE);
}

#[tokio::test]
async fn hidden_cases_count_but_are_not_visible() {
    let cases = vec![
        TestCase::expecting("a"),
        TestCase::expecting("b").hidden(),
        TestCase::expecting("a").hidden(),
    ];
    let report = run_tests("say a", &cases, echo).await;
    assert!(!report.all_passed);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.visible_results.len(), 1);
    assert!(report.visible_results[0].passed);
    assert_eq!(report.failed_visible().count(), 0);
    assert!(report.results[1].hidden && !report.results[1].passed);
}

#[tokio::test]
async fn no_cases_means_vacuous_pass() {
    let (execute, calls) = canned(ExecutionResult::ok(""));
    let report = run_tests("print(1)", &[], execute).await;
    assert!(report.all_passed);
    assert!(report.results.is_empty());
    assert!(report.visible_results.is_empty());
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_expected_output_expects_silence() {
    let case = TestCase::default();
    let (execute, _) = canned(ExecutionResult::ok("  \n"));
    assert!(run_tests("pass", std::slice::from_ref(&case), execute).await.all_passed);

    let (execute, _) = canned(ExecutionResult::ok("noise\n"));
    assert!(!run_tests("print('noise')", &[case], execute).await.all_passed);
}

#[tokio::test]
async fn setup_code_is_prepended_on_its_own_line() {
    let (execute, calls) = canned(ExecutionResult::ok("6\n"));
    let case = TestCase::expecting("6").with_setup("n = 3");
    let report = run_tests("print(n * 2)", &[case, TestCase::expecting("6")], execute).await;
    assert!(report.all_passed);
    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].0, "n = 3\nprint(n * 2)");
    assert_eq!(calls[1].0, "print(n * 2)");
}

#[tokio::test]
async fn results_keep_input_order_and_are_repeatable() {
    let cases: Vec<TestCase> = ["x", "y", "x", "z"].into_iter().map(TestCase::expecting).collect();
    let first = run_tests("say x", &cases, echo).await;
    let second = run_tests("say x", &cases, echo).await;
    assert_eq!(first, second);
    let verdicts: Vec<bool> = first.results.iter().map(|r| r.passed).collect();
    assert_eq!(verdicts, [true, false, true, false]);
}

#[tokio::test]
async fn invalid_pattern_fails_the_case_with_a_reason() {
    let (execute, _) = canned(ExecutionResult::ok("x\n"));
    let report = run_tests("print('x')", &[TestCase::expecting("/(x/")], execute).await;
    assert!(!report.all_passed);
    assert!(report.results[0].actual.starts_with("Invalid pattern /(x/"));
}

#[test]
fn compare_treats_non_patterns_literally() {
    assert_eq!(compare("a/b", "a/b"), Ok(true));
    assert_eq!(compare("1/2/3", "1/2/3"), Ok(true));
    assert_eq!(compare("/", "/"), Ok(true));
    assert_eq!(compare("", ""), Ok(true));
    assert_eq!(compare("abc", "/b/"), Ok(true));
    assert_eq!(compare("abc", "/^b/"), Ok(false));
}

#[test]
fn pattern_shorthand_classes_are_ascii() {
    assert_eq!(compare("42", r"/^\d+$/"), Ok(true));
    assert_eq!(compare("\u{664}\u{662}", r"/^\d+$/"), Ok(false));
    assert_eq!(compare("h\u{e9}llo", r"/^\w+$/"), Ok(false));
    assert_eq!(compare("h\u{e9}llo", r"/^\W*h\W/"), Ok(true));
    assert_eq!(compare("1,2", r"/^[\d,]+$/"), Ok(true));
    assert_eq!(compare("\u{e9}cat", r"/\bcat\b/"), Ok(true));
    assert_eq!(compare("concat", r"/\bcat\b/"), Ok(false));
    // Other Unicode handling is unchanged.
    assert_eq!(compare("h\u{e9}llo", r"/^h.llo$/"), Ok(true));
    assert_eq!(compare("CAF\u{c9}", "/caf\u{e9}/i"), Ok(true));
}

#[test]
fn test_cases_accept_content_json() {
    let cases: Vec<TestCase> = serde_json::from_str(
        r#"[
            {"expectedOutput": "Hello"},
            {"input": "name = 'Ada'", "expectedOutput": "/ada/i", "hidden": true},
            {"setupCode": "x = 1", "expectedResult": 1}
        ]"#,
    )
    .unwrap();
    assert_eq!(cases[0].expected_output.as_deref(), Some("Hello"));
    assert_eq!(cases[1].setup_code.as_deref(), Some("name = 'Ada'"));
    assert!(cases[1].hidden);
    assert_eq!(cases[2].expected_output, None);
    assert_eq!(cases[2].expected_result, Some(serde_json::json!(1)));
}

fn challenge() -> Challenge {
    Challenge {
        id: "boss-1".into(),
        title: "Boss".into(),
        test_cases: vec![TestCase::expecting("done")],
        bonus_objectives: vec![
            BonusObjective {
                description: "Says done".into(),
                test_case: TestCase::expecting("done"),
                bonus_xp: 25,
            },
            BonusObjective {
                description: "Says more".into(),
                test_case: TestCase::expecting("more"),
                bonus_xp: 25,
            },
        ],
    }
}

#[tokio::test]
async fn challenge_bonus_objectives_run_after_a_pass() {
    let outcome = run_challenge("say done", &challenge(), echo).await;
    assert!(outcome.passed());
    assert_eq!(outcome.bonus_passed, [true, false]);
    assert_eq!(outcome.bonus_objectives_passed(), 1);
}

#[tokio::test]
async fn challenge_bonus_objectives_skip_after_a_failure() {
    let (execute, calls) = canned(ExecutionResult::ok("nope\n"));
    let outcome = run_challenge("print('nope')", &challenge(), execute).await;
    assert!(!outcome.passed());
    assert!(outcome.bonus_passed.is_empty());
    assert_eq!(outcome.bonus_objectives_passed(), 0);
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[test]
fn bonus_xp_defaults_when_absent() {
    let bonus: BonusObjective =
        serde_json::from_str(r#"{"description": "d", "testCase": {"expectedOutput": "x"}}"#).unwrap();
    assert_eq!(bonus.bonus_xp, 25);
}
