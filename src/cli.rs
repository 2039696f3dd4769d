use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Day planner: recurring tasks, schedule layout, conflicts and slot allocation
#[derive(Debug, Parser)]
#[command(
    name = "dayplan",
    version,
    about = "Plan a day around events, time blocks and recurring tasks",
    after_help = "Logs are written to: <workspace>/logs/dayplan.log"
)]
pub struct Cli {
    /// Workspace holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate due recurring task instances (daily batch)
    Generate {
        /// Target date, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<String>,

        /// Only generate for this user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Suggest start times for unfixed tasks
    Plan {
        #[arg(short, long)]
        date: Option<String>,

        #[arg(short, long)]
        user: Option<String>,

        /// Persist the suggested times
        #[arg(long)]
        apply: bool,
    },

    /// Show free time for a day
    Slots {
        #[arg(short, long)]
        date: Option<String>,

        #[arg(short, long)]
        user: Option<String>,
    },

    /// Position events and fixed tasks on the day view
    Layout {
        #[arg(short, long)]
        date: Option<String>,

        #[arg(short, long)]
        user: Option<String>,
    },

    /// Check a fixed-time task against events and time blocks
    Conflicts {
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },

    /// Propose (or apply) splitting a task over free time
    Split {
        #[arg(value_name = "TASK_ID")]
        task_id: String,

        /// Day to split into (default: the task's date)
        #[arg(short, long)]
        date: Option<String>,

        /// Persist the proposed parts
        #[arg(long)]
        apply: bool,
    },

    /// Delete a recurring task definition
    DeleteRecurring {
        #[arg(value_name = "DEFINITION_ID")]
        definition_id: String,

        /// Also delete generated instances dated on or after this day
        #[arg(long, value_name = "DATE")]
        cascade_from: Option<String>,
    },

    /// Load records from a JSON snapshot file
    Import {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}
