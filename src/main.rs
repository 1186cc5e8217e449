mod cli;

use std::{
    io::{self, Read, Write},
    path::Path,
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use pyquest::{
    achievements::default_definitions,
    config::Config,
    content::{ContentLibrary, ContentProvider},
    execution::{ChannelOptions, ExecutionChannel, ExecutionFailure, ExecutionResult, HostStatus},
    grader::{run_tests, TestCase, TestRunResult},
    process::PythonLauncher,
    progression::{calculate_level_xp, player_level, ExerciseOutcome, LevelResult},
    store::{FileProgressStore, Progress, ProgressStore, PROGRESS_KEY},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let cfg = Config::load();

    // RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let color = io::stdout().is_terminal();
    match args.command {
        Command::Run { file, timeout_ms, json } => {
            let code = read_source(&file)?;
            let channel = connect(&cfg).await?;
            let timeout = timeout_ms.map(Duration::from_millis).unwrap_or(channel.options().default_timeout);
            let result = channel.execute(code, timeout).await;
            channel.shutdown().await;
            print_run(&result, json, color)?;
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Test { file, cases, exercise, json } => {
            let code = read_source(&file)?;
            let test_cases = match (cases, exercise) {
                (Some(path), _) => load_cases(&path)?,
                (None, Some(id)) => {
                    let path = cfg
                        .content_path()
                        .ok_or_else(|| anyhow!("PYQUEST_CONTENT_PATH is not set; pass --cases instead"))?;
                    ContentLibrary::load(&path)?
                        .test_cases(&id)
                        .ok_or_else(|| anyhow!("unknown exercise: {id}"))?
                }
                (None, None) => bail!("provide --cases <FILE> or --exercise <ID>"),
            };
            let channel = connect(&cfg).await?;
            let report = run_tests(&code, &test_cases, |code, timeout| channel.execute(code, timeout)).await;
            channel.shutdown().await;
            print_tests(&report, json, color)?;
            if !report.all_passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Xp { stars, boss, bonus, streak, exercises } => {
            let exercise_outcomes = exercises
                .iter()
                .map(|spec| parse_outcome(spec))
                .collect::<Result<Vec<_>>>()?;
            let breakdown = calculate_level_xp(&LevelResult {
                stars,
                is_boss: boss,
                bonus_objectives_passed: bonus,
                exercise_outcomes,
                streak_days: streak,
            });
            println!("Exercise XP:      {}", breakdown.exercise_xp);
            println!("No-hints bonus:   {}", breakdown.no_hints_bonus);
            println!("First-try bonus:  {}", breakdown.first_try_bonus);
            println!("Level bonus:      {}", breakdown.level_bonus);
            println!("Streak x{:.2}", breakdown.streak_multiplier);
            let total = format!("Total XP:         {}", breakdown.total);
            if color {
                println!("{}", total.green().bold());
            } else {
                println!("{total}");
            }
            Ok(())
        }
        Command::Progress { json } => {
            let store = FileProgressStore::from_config(&cfg)?;
            let progress = store.get(PROGRESS_KEY)?.unwrap_or_default();
            if json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
            } else {
                print_progress(&progress, color)?;
            }
            Ok(())
        }
        Command::Reset { yes } => {
            if !yes && io::stdin().is_terminal() {
                print!("Delete all stored progress? [y/N] ");
                io::stdout().flush()?;
                let mut answer = String::new();
                io::stdin().read_line(&mut answer)?;
                if !answer.trim().eq_ignore_ascii_case("y") {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            let store = FileProgressStore::from_config(&cfg)?;
            store.remove(PROGRESS_KEY)?;
            println!("Progress reset.");
            Ok(())
        }
    }
}

/// Launch the Python host and wait for it to come up.
async fn connect(cfg: &Config) -> Result<ExecutionChannel> {
    let launcher = Arc::new(PythonLauncher::from_config(cfg));
    let channel = ExecutionChannel::connect(launcher, ChannelOptions::from_config(cfg))
        .with_context(|| format!("Python is unavailable ({})", cfg.python_bin()))?;
    let limit = cfg.get_millis("PYQUEST_READY_TIMEOUT_MS").unwrap_or(Duration::from_secs(10));
    match channel.wait_ready(limit).await {
        HostStatus::Ready => Ok(channel),
        HostStatus::Failed(reason) => Err(ExecutionFailure::HostFatal(reason).into()),
        HostStatus::Starting => bail!("Python did not become ready within {} ms", limit.as_millis()),
    }
}

fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_cases(path: &Path) -> Result<Vec<TestCase>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing test cases in {}", path.display()))
}

fn parse_outcome(spec: &str) -> Result<ExerciseOutcome> {
    let (hints, attempts) = spec
        .split_once(':')
        .ok_or_else(|| anyhow!("expected HINTS:ATTEMPTS, got {spec:?}"))?;
    let hints = hints.trim().parse().with_context(|| format!("invalid hint count in {spec:?}"))?;
    let attempts = attempts.trim().parse().with_context(|| format!("invalid attempt count in {spec:?}"))?;
    Ok(ExerciseOutcome::new(hints, attempts))
}

fn print_run(result: &ExecutionResult, json: bool, color: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if let Some(out) = result.stdout.as_deref().filter(|s| !s.is_empty()) {
        print!("{out}");
    }
    if let Some(err) = result.stderr.as_deref().filter(|s| !s.is_empty()) {
        eprint!("{err}");
    }
    if let Some(value) = &result.return_value {
        println!("=> {value}");
    }
    if let Some(error) = &result.error {
        if color {
            eprintln!("{}", error.red());
        } else {
            eprintln!("{error}");
        }
    }
    Ok(())
}

fn print_tests(report: &TestRunResult, json: bool, color: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for (i, r) in report.visible_results.iter().enumerate() {
        let mark = if r.passed { "PASS" } else { "FAIL" };
        let mark = match (color, r.passed) {
            (true, true) => format!("{}", mark.green()),
            (true, false) => format!("{}", mark.red()),
            _ => mark.to_string(),
        };
        println!("{mark} test {}", i + 1);
        if !r.passed {
            println!("  expected: {}", r.expected);
            println!("  actual:   {}", r.actual);
        }
    }
    let hidden = report.results.len() - report.visible_results.len();
    if hidden > 0 {
        let hidden_passed = report.results.iter().filter(|r| r.hidden && r.passed).count();
        println!("hidden: {hidden_passed}/{hidden} passed");
    }
    let passed = report.results.iter().filter(|r| r.passed).count();
    let summary = format!("{passed}/{} tests passed", report.results.len());
    match (color, report.all_passed) {
        (true, true) => println!("{}", summary.green().bold()),
        (true, false) => println!("{}", summary.red().bold()),
        _ => println!("{summary}"),
    }
    Ok(())
}

fn print_progress(progress: &Progress, color: bool) -> Result<()> {
    let level = player_level(progress.total_xp);
    let header = format!("Level {} {}", level.level, level.title);
    if color {
        println!("{}", header.cyan().bold());
    } else {
        println!("{header}");
    }
    if level.is_max_level {
        println!("{} XP (max level)", progress.total_xp);
    } else {
        println!(
            "{} XP ({:.0}% toward {} XP)",
            progress.total_xp,
            level.progress * 100.0,
            level.xp_for_next
        );
    }
    println!("Streak: {} days (longest {})", progress.streak.current, progress.streak.longest);

    let completed = progress.level_progress.values().filter(|lp| lp.is_completed()).count();
    println!("Levels completed: {completed}");
    for lp in progress.level_progress.values().filter(|lp| lp.is_completed()) {
        println!("  {} {}", lp.level_id, "*".repeat(usize::from(lp.stars)));
    }

    let total = default_definitions().map(|d| d.len()).unwrap_or(0);
    println!("Achievements: {}/{}", progress.achievements.len(), total);
    for a in &progress.achievements {
        println!("  {} {}: {}", a.icon, a.name, a.description);
    }
    Ok(())
}
