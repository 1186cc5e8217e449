use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "pyquest", about = "Run, grade and score PyQuest exercises", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Execute a Python file in the sandboxed interpreter host.
    Run {
        /// Source file; `-` reads stdin.
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Execution budget in milliseconds (defaults to PYQUEST_EXEC_TIMEOUT_MS).
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Grade a Python file against test cases.
    Test {
        /// Source file; `-` reads stdin.
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// JSON file holding an array of test cases.
        #[arg(long, conflicts_with = "exercise")]
        cases: Option<PathBuf>,

        /// Exercise id to look up in the content file (PYQUEST_CONTENT_PATH).
        #[arg(long)]
        exercise: Option<String>,

        /// Print the full result as JSON, hidden cases included.
        #[arg(long)]
        json: bool,
    },

    /// Compute the XP breakdown for a finished level.
    Xp {
        /// Star rating earned (1-3).
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
        stars: u8,

        /// The level is a boss level.
        #[arg(long)]
        boss: bool,

        /// Number of bonus objectives passed.
        #[arg(long, default_value_t = 0)]
        bonus: u32,

        /// Current streak in days.
        #[arg(long, default_value_t = 0)]
        streak: u32,

        /// One exercise outcome as HINTS:ATTEMPTS. Repeatable.
        #[arg(long = "exercise", value_name = "HINTS:ATTEMPTS", action = clap::ArgAction::Append)]
        exercises: Vec<String>,
    },

    /// Show stored progress, player level and achievements.
    Progress {
        /// Print the stored progress as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete stored progress.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },
}
