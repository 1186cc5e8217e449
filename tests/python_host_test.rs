use std::{
    process::Command,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use pyquest::{
    config::Config,
    execution::{
        ChannelOptions, ExecutionChannel, ExecutionFailure, GuardPolicy, HostStatus, HOST_TIMEOUT_MESSAGE,
        LOOP_GUARD_MESSAGE,
    },
    grader::{run_tests, TestCase},
    process::PythonLauncher,
};

fn python_available() -> bool {
    Command::new("python3").arg("--version").output().map(|o| o.status.success()).unwrap_or(false)
}

async fn python_channel(policy: GuardPolicy) -> Result<Option<ExecutionChannel>> {
    if !python_available() {
        println!("python3 not found; skipping");
        return Ok(None);
    }
    let launcher = Arc::new(PythonLauncher::new("python3", policy));
    let channel = ExecutionChannel::connect(launcher, ChannelOptions::default())?;
    let status = channel.wait_ready(Duration::from_secs(10)).await;
    anyhow::ensure!(status == HostStatus::Ready, "python host not ready: {status:?}");
    Ok(Some(channel))
}

#[tokio::test]
async fn prints_and_trailing_expression() -> Result<()> {
    let Some(channel) = python_channel(GuardPolicy::default()).await? else {
        return Ok(());
    };
    let result = channel.execute("print(2 + 2)\nx = 21\nx * 2".into(), Duration::from_secs(5)).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.stdout.as_deref(), Some("4\n"));
    assert_eq!(result.return_value.as_deref(), Some("42"));
    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn globals_do_not_leak_between_runs() -> Result<()> {
    let Some(channel) = python_channel(GuardPolicy::default()).await? else {
        return Ok(());
    };
    let first = channel.execute("secret = 1".into(), Duration::from_secs(5)).await;
    assert!(first.success);
    let second = channel.execute("print(secret)".into(), Duration::from_secs(5)).await;
    assert!(!second.success);
    assert_eq!(second.error.as_deref(), Some("NameError: name 'secret' is not defined"));
    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn errors_are_described() -> Result<()> {
    let Some(channel) = python_channel(GuardPolicy::default()).await? else {
        return Ok(());
    };
    let result = channel.execute("print('a')\n1/0".into(), Duration::from_secs(5)).await;
    assert!(!result.success);
    assert_eq!(result.stdout.as_deref(), Some("a\n"));
    assert_eq!(result.error.as_deref(), Some("ZeroDivisionError: division by zero"));

    let result = channel.execute("def broken(:\n  pass".into(), Duration::from_secs(5)).await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or_default().starts_with("SyntaxError:"));

    let result = channel.execute("input()".into(), Duration::from_secs(5)).await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or_default().starts_with("EOFError"));
    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn infinite_loop_hits_the_step_limit() -> Result<()> {
    let Some(channel) = python_channel(GuardPolicy::default().with_ceiling(50_000)).await? else {
        return Ok(());
    };
    let result = channel.execute("while True:\n    pass".into(), Duration::from_secs(5)).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(LOOP_GUARD_MESSAGE));

    let after = channel.execute("print('ok')".into(), Duration::from_secs(5)).await;
    assert_eq!(after.stdout.as_deref(), Some("ok\n"));
    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn blocking_call_times_out_inside_the_host() -> Result<()> {
    let Some(channel) = python_channel(GuardPolicy::default()).await? else {
        return Ok(());
    };
    let pid = channel.execute("import os\nos.getpid()".into(), Duration::from_secs(5)).await.return_value;
    assert!(pid.is_some());

    let started = Instant::now();
    let result = channel
        .execute("import time\nprint('before')\ntime.sleep(3)\nprint('done')".into(), Duration::from_millis(200))
        .await;
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(1500), "host did not enforce the timeout: {elapsed:?}");
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(HOST_TIMEOUT_MESSAGE));
    assert_eq!(result.failure(), Some(ExecutionFailure::Timeout));
    assert_eq!(result.stdout.as_deref(), Some("before\n"));

    // The host survived: same process, and the timer is disarmed for the next run.
    assert!(channel.is_ready());
    let again = channel.execute("import os, time\ntime.sleep(0.3)\nos.getpid()".into(), Duration::from_secs(5)).await;
    assert!(again.success, "{:?}", again.error);
    assert_eq!(again.return_value, pid);
    channel.shutdown().await;
    Ok(())
}

#[cfg(unix)]
fn process_alive(pid: &str) -> bool {
    Command::new("kill").args(["-0", pid]).status().map(|s| s.success()).unwrap_or(false)
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_kills_a_host_with_a_stalled_stdin() -> Result<()> {
    let Some(channel) = python_channel(GuardPolicy::default()).await? else {
        return Ok(());
    };
    let pid = channel
        .execute("import os\nos.getpid()".into(), Duration::from_secs(5))
        .await
        .return_value
        .context("no pid")?;

    // The first run ignores its timer and blocks; the second is larger than the
    // pipe buffer, so the writer stalls behind it.
    let stuck = "import signal, time\nsignal.signal(signal.SIGALRM, signal.SIG_IGN)\ntime.sleep(30)";
    let big = format!("x = '{}'", "a".repeat(1 << 20));
    let runs = async {
        tokio::join!(
            channel.execute(stuck.into(), Duration::from_secs(30)),
            channel.execute(big, Duration::from_secs(30)),
        )
    };
    let restart = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        channel.restart().await
    };
    let ((first, second), restarted) = tokio::join!(runs, restart);
    restarted?;
    assert_eq!(first.failure(), Some(ExecutionFailure::Interrupted));
    assert_eq!(second.failure(), Some(ExecutionFailure::Interrupted));

    let deadline = Instant::now() + Duration::from_secs(5);
    while process_alive(&pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!process_alive(&pid), "old python host {pid} outlived the restart");

    assert_eq!(channel.wait_ready(Duration::from_secs(10)).await, HostStatus::Ready);
    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn grades_a_submission_end_to_end() -> Result<()> {
    let Some(channel) = python_channel(GuardPolicy::default()).await? else {
        return Ok(());
    };
    let cases = vec![
        TestCase::expecting("4"),
        TestCase::expecting(r"/^\d+$/").with_setup("n = 2").hidden(),
    ];
    let report = run_tests("print(n * 2 if 'n' in dir() else 4)", &cases, |code, timeout| {
        channel.execute(code, timeout)
    })
    .await;
    assert!(report.all_passed, "{:?}", report.results);
    assert_eq!(report.visible_results.len(), 1);
    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_interpreter_fails_to_connect() -> Result<()> {
    let cfg = Config::from_pairs([("PYQUEST_PYTHON", "pyquest-no-such-python-binary")]);
    let launcher = Arc::new(PythonLauncher::from_config(&cfg));
    assert!(ExecutionChannel::connect(launcher, ChannelOptions::default()).is_err());
    Ok(())
}
