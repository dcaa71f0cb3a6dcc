//! Command-line front end for the script store and benchmark runner.
//!
//! Configuration comes from the environment (and `.env`), see
//! `sql_runner::config`; the global flags below override it.
//!
//! Usage:
//!   sql-runner list
//!   sql-runner create new_query.sql
//!   sql-runner run 3 --transactional
//!   sql-runner bench 20 --max-workers 64 --json

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sql_runner::config::Settings;
use sql_runner::report::print_report;
use sql_runner::SqlRunner;

#[derive(Debug, Parser)]
#[command(name = "sql-runner", version, about = "Benchmark a directory of numbered SQL scripts")]
struct Cli {
    /// Directory holding `1.sql .. N.sql` [env: SCRIPTS_DIR]
    #[arg(long, global = true)]
    scripts_dir: Option<PathBuf>,

    /// SQLite database file the scripts run against [env: DB_PATH]
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Size of the shared worker and connection pools [env: MAX_WORKERS]
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// off, error, warn, info, debug or trace [env: RUNNER_LOG_LEVEL]
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List scripts with their sizes
    List,
    /// Print the text of one script
    Show { number: u32 },
    /// Add a script (from FILE, or stdin when omitted) as the next number
    Create { file: Option<PathBuf> },
    /// Replace the text of an existing script
    Put { number: u32, file: Option<PathBuf> },
    /// Delete a script and shift later ones down
    Delete { number: u32 },
    /// Close numbering gaps and finish an interrupted renumbering
    Renumber,
    /// Execute one script once and print its duration
    Run {
        number: u32,
        /// Run the whole script in one transaction
        #[arg(long)]
        transactional: bool,
    },
    /// Execute every script COUNT times concurrently
    Bench {
        count: usize,
        #[arg(long)]
        transactional: bool,
        /// Use a dedicated pool of this many workers for this run (1..=1024)
        #[arg(long)]
        max_workers: Option<usize>,
        /// Print the report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn read_input(file: Option<&PathBuf>) -> Result<Vec<u8>> {
    match file {
        Some(path) => fs::read(path).with_context(|| format!("reading {}", path.display())),
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).context("reading stdin")?;
            Ok(buf)
        }
    }
}

fn resolve_settings(cli: &Cli) -> Settings {
    let mut settings = Settings::from_env();
    if let Some(dir) = &cli.scripts_dir {
        settings.scripts_dir = dir.clone();
    }
    if let Some(db) = &cli.database {
        settings.database_path = db.clone();
    }
    if let Some(workers) = cli.workers {
        settings.max_workers = workers.clamp(1, runner_core::types::MAX_WORKERS_LIMIT);
    }
    if let Some(level) = cli.log_level.as_deref().and_then(runner_core::parse_log_level) {
        settings.log_level = level;
    }
    settings
}

fn execute(cli: &Cli, runner: &SqlRunner) -> Result<()> {
    match &cli.command {
        Command::List => {
            for script in runner.list_scripts()? {
                println!("{:>6}  {:>8} B  {}", script.number, script.size_bytes, script.path.display());
            }
        }
        Command::Show { number } => {
            print!("{}", runner.get_script(*number)?);
        }
        Command::Create { file } => {
            let bytes = read_input(file.as_ref())?;
            let number = runner.create_script(&bytes)?;
            println!("{number}");
        }
        Command::Put { number, file } => {
            let bytes = read_input(file.as_ref())?;
            let text = String::from_utf8(bytes).context("script text must be UTF-8")?;
            runner.put_script(*number, &text)?;
        }
        Command::Delete { number } => {
            runner.delete_script(*number)?;
        }
        Command::Renumber => {
            let moved = runner.renumber_scripts()?;
            println!("{moved} file(s) moved");
        }
        Command::Run {
            number,
            transactional,
        } => {
            let outcome = runner.run_one(*number, *transactional)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Bench {
            count,
            transactional,
            max_workers,
            json,
        } => {
            let report = runner.run_benchmark(*count, *transactional, *max_workers)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli);

    runner_core::initialize_logger(settings.log_level, settings.log_file.as_deref())
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize logger: {e}. Exiting.");
            process::exit(1);
        });
    if let Some(path) = &settings.env_file {
        log::debug!("Loaded environment from {}", path.display());
    }

    let result = SqlRunner::from_settings(&settings)
        .context("starting runner")
        .and_then(|runner| execute(&cli, &runner));

    if let Err(e) = result {
        log::error!("{e:#}");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}
