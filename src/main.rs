//! testrail-reporter CLI - replay recorded test runs into TestRail.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use testrail_reporter::config;
use testrail_reporter::event::{TestEvent, parse_event_log};
use testrail_reporter::report::{ConsoleReporter, MultiReporter, Reporter, reporter_from_config};

#[derive(Parser)]
#[command(name = "testrail-reporter")]
#[command(about = "Publish test results to TestRail", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "testrail.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines event log and publish its results
    Replay {
        /// Event log, one event per line
        events: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // debug_log in the config also raises the level
    let debug_log = config::load_config(&cli.config)
        .map(|c| c.testrail.debug_log)
        .unwrap_or(false);
    let log_level = if cli.verbose || debug_log {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Replay { events } => replay(&cli.config, &events, cli.verbose).await,
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(),
    }
}

async fn replay(config_path: &Path, events_path: &Path, verbose: bool) -> Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Loaded configuration from {}", config_path.display());

    let content = std::fs::read_to_string(events_path)
        .with_context(|| format!("Failed to read event log: {}", events_path.display()))?;
    let events = parse_event_log(&content)
        .with_context(|| format!("Failed to parse event log: {}", events_path.display()))?;
    info!("Replaying {} events", events.len());

    let run_with_workers = config.testrail.run_with_workers;
    let reporter = MultiReporter::new()
        .with_reporter(ConsoleReporter::new(verbose))
        .with_boxed(reporter_from_config(config.testrail)?);

    for event in &events {
        event.dispatch(&reporter).await;
    }

    let finished = events
        .iter()
        .any(|e| matches!(e, TestEvent::AllFinished | TestEvent::WorkersFinished { .. }));
    if !finished {
        if run_with_workers {
            warn!("Event log has no workers_finished event, nothing is published");
        } else {
            reporter.on_run_complete().await;
        }
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    let config = match config::load_config(config_path) {
        Ok(config) => config.testrail,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    if config.enabled
        && let Err(e) = config.validate()
    {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!("  Host: {}", config.host);
    println!("  Project: {}", config.project_id);
    match config.suite_id {
        Some(suite_id) => println!("  Suite: {}", suite_id),
        None => println!("  Suite: first suite of the project"),
    }
    match (&config.plan, config.run_id) {
        (Some(plan), _) => match plan.existing_plan_id {
            Some(plan_id) => println!("  Target: new entry in plan {}", plan_id),
            None => println!("  Target: new plan"),
        },
        (None, Some(run_id)) => println!("  Target: run {}", run_id),
        (None, None) => println!("  Target: new run"),
    }
    println!("  Tag prefix: {}", config.prefix_tag);
    println!("  Close run: {}", config.close_test_run);
    println!("  Enabled: {}", config.enabled);

    Ok(())
}

fn init_config() -> Result<()> {
    let config = r#"# testrail-reporter configuration file

[testrail]
host = "https://example.testrail.io"
user = "ci@example.com"
password = "api-key"
project_id = 1
# suite_id = 1
# run_id = 1
# run_name = "Nightly"
prefix_tag = "@C"
version = "1"
close_test_run = true
enabled = true
# screenshot_command = "import -window root {file}"
output_dir = "output"

# [testrail.plan]
# existing_plan_id = 1
# only_case_ids = true

# [testrail.configuration]
# group_name = "Browsers"
# config_name = "Chrome"

[testrail.test_case.passed]
status_id = 1
comment = "Test case {tag} passed"

[testrail.test_case.failed]
status_id = 5
comment = "Test case {tag} failed: {error}"

[testrail.test_case.skipped]
status_id = 2
comment = "Test case {tag} was skipped"
"#;

    let path = PathBuf::from("testrail.toml");
    if path.exists() {
        eprintln!("testrail.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created testrail.toml");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  testrail-reporter replay events.jsonl");

    Ok(())
}
