mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use crate::commands::{
    cmd_cancel, cmd_clear_stats, cmd_history, cmd_meal2, cmd_next, cmd_prune, cmd_settings_reset,
    cmd_settings_set, cmd_settings_show, cmd_stats, cmd_status, cmd_watch, now, print_notices,
};
use crate::config::Config;
use iftimer_core::service::FastingService;

#[derive(Parser)]
#[command(
    name = "iftimer",
    version,
    about = "An intermittent-fasting timer: two meals, one eating window, a long fast",
    long_about = "Tracks a daily cycle of Meal 1, a break, Meal 2 and the fasting window.\n\
                  Every command first catches up on anything that expired since the last run."
)]
struct Cli {
    /// Database file (default: platform data directory)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current stage, timers and what to do next
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Press the main button: start or finish the current meal
    Next {
        /// Skip the confirmation asked when it is earlier than recommended
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Undo the most recent stage change
    Cancel {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start Meal 2 on a day already marked as one meal a day
    Meal2 {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep the timer running in the foreground, ticking once per interval
    Watch {
        /// Seconds between ticks
        #[arg(short, long, default_value = "1")]
        interval: u64,
    },
    /// Show averages for the previous cycle and the last 7/30/365 cycles
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored cycles, newest first
    History {
        /// Show at most this many cycles
        #[arg(short, long)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete history (everything while fasting, otherwise all but the current cycle)
    ClearStats {
        /// Required: confirm deletion
        #[arg(long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete all but the most recent 365 cycles
    Prune {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// View or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show all settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change one setting
    Set {
        /// Setting name, e.g. `max_meal_minutes`
        key: String,
        /// New value
        value: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore every setting to its default
    Reset {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;

    // Reset must work even when the stored settings no longer load.
    if let Commands::Settings {
        command: SettingsCommands::Reset { json },
    } = cli.command
    {
        return cmd_settings_reset(&config, json);
    }

    let mut svc = FastingService::new(config.db_path_str()?)?;
    let notices = svc.resume(now())?;
    print_notices(&notices, svc.settings());

    match cli.command {
        Commands::Status { json } => cmd_status(&svc, json),
        Commands::Next { yes, json } => cmd_next(&mut svc, yes, json),
        Commands::Cancel { json } => cmd_cancel(&mut svc, json),
        Commands::Meal2 { json } => cmd_meal2(&mut svc, json),
        Commands::Watch { interval } => cmd_watch(&mut svc, interval).await,
        Commands::Stats { json } => cmd_stats(&mut svc, json),
        Commands::History { limit, json } => cmd_history(&svc, limit, json),
        Commands::ClearStats { yes, json } => cmd_clear_stats(&mut svc, yes, json),
        Commands::Prune { json } => cmd_prune(&mut svc, json),
        Commands::Settings { command } => match command {
            SettingsCommands::Show { json } => cmd_settings_show(&svc, json),
            SettingsCommands::Set { key, value, json } => {
                cmd_settings_set(&mut svc, &key, &value, json)
            }
            SettingsCommands::Reset { .. } => unreachable!("handled before the service is opened"),
        },
    }
}
