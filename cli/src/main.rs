// pbgatt — PB-GATT bearer simulator
//
// Runs provisioning link scenarios against the bearer on simulated time and
// manages the bearer configuration used for those runs.

mod config;
mod script;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pbgatt")]
#[command(about = "PB-GATT provisioning bearer simulator", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario script
    Run {
        script: PathBuf,
        /// Override the protocol timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Path,
    Get { key: String },
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::Config::config_file()?,
    };

    match cli.command {
        Commands::Run { script, timeout } => cmd_run(&config_path, script, timeout),
        Commands::Config { action } => cmd_config(&config_path, action),
    }
}

fn cmd_run(config_path: &Path, script_path: PathBuf, timeout: Option<u64>) -> Result<()> {
    let config = config::Config::load_from(config_path)?;
    let mut bearer_config = config.bearer.clone();
    if let Some(secs) = timeout {
        bearer_config = bearer_config.with_timeout(secs);
    }

    let text = std::fs::read_to_string(&script_path)
        .with_context(|| format!("Failed to read script {}", script_path.display()))?;
    let steps = script::parse_script(&text)?;

    println!(
        "{} {} ({} steps, timeout {}s)",
        "Running".bold(),
        script_path.display(),
        steps.len(),
        bearer_config.protocol_timeout_secs
    );
    println!();

    let mut runner = script::Runner::new(bearer_config, config.rx_buf_size)?;
    let mut failures = 0;

    for report in runner.run_all(steps) {
        let now = runner.simulation().clock().now().as_secs();
        match &report.result {
            Ok(()) => println!("[{:>5}s] {} {}", now, "✓".green(), report.step),
            Err(e) => {
                failures += 1;
                println!(
                    "[{:>5}s] {} {} {}",
                    now,
                    "✗".red(),
                    report.step,
                    format!("({})", e).bright_red()
                );
            }
        }
        if report.timed_out {
            println!("         {}", "protocol timeout".yellow());
        }
        for action in &report.actions {
            println!("         {} {}", "→".dimmed(), action);
        }
        for event in &report.events {
            println!("         {} {}", "←".bright_cyan(), event);
        }
    }

    println!();
    let link = runner.simulation().bearer().link();
    match link.conn() {
        Some(conn) => println!("Link: {} on conn {}", "active".green(), conn),
        None => println!("Link: {}", "idle".dimmed()),
    }
    println!("Rejected steps: {}", failures);

    Ok(())
}

fn cmd_config(config_path: &Path, action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load_from(config_path)?;

    match action {
        ConfigAction::Show => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save_to(config_path)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
    }

    Ok(())
}
