use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use build_updater::config::Config;
use build_updater::logging::init_logging;
use build_updater::update::{
    BuildClient, FileVersionStore, Installer, ProcessController, ProcessHandle,
    SystemProcessTable, Updater,
};

#[derive(Parser, Debug)]
#[command(name = "build-updater")]
#[command(about = "Keep a desktop app on the latest build from its build server")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More diagnostic output on stderr (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check for a newer build and install it (the default)
    Run,

    /// Only report whether a newer build exists
    Check,

    /// Show the recorded build and whether the app is running
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    init_logging(cli.verbose, !cli.no_color);

    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded config");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_update_command(&config),
        Command::Check => run_check_command(&config),
        Command::Status => run_status_command(&config),
    }
}

fn build_updater(
    config: &Config,
) -> Result<Updater<BuildClient, FileVersionStore, SystemProcessTable>> {
    let client = BuildClient::new(
        &config.server_url,
        &config.api_version,
        &config.artifact_name,
        config.request_timeout(),
    )
    .context("Failed to create build server client")?
    .with_progress(config.show_progress);

    let installer = Installer {
        install_dir: config.install_dir.clone(),
        extract_root: config.extract_root.clone(),
        download_dir: config.download_dir.clone(),
        artifact_name: config.artifact_name.clone(),
    };

    Ok(Updater::new(
        client,
        FileVersionStore::new(&config.state_file),
        SystemProcessTable,
        installer,
        config.managed_app(),
        config.record_policy,
    ))
}

fn run_update_command(config: &Config) -> Result<()> {
    let mut updater = build_updater(config)?;
    updater
        .run()
        .with_context(|| format!("Update failed while {}", updater.stage()))?;
    Ok(())
}

fn run_check_command(config: &Config) -> Result<()> {
    let updater = build_updater(config)?;
    let check = updater.check().context("Failed to check for updates")?;

    let local = check
        .local
        .map(|b| b.to_string())
        .unwrap_or_else(|| "none".to_string());

    if check.is_stale() {
        println!(
            "{} New build available: {} → {}",
            "↑".yellow(),
            local.dimmed(),
            check.latest.to_string().green()
        );
        println!("  Run `build-updater run` to install");
    } else {
        println!("{} Local app is up-to-date (build {})", "✓".green(), local);
    }
    Ok(())
}

fn run_status_command(config: &Config) -> Result<()> {
    let store = FileVersionStore::new(&config.state_file);
    let record = store
        .read_record()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    println!("{}", "STATUS".bold());
    println!("   State file: {}", store.path().display());
    match record {
        Some(record) => {
            let when = record
                .recorded_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "   Applied build: {} (recorded {})",
                record.build.to_string().green(),
                when.dimmed()
            );
        }
        None => println!("   Applied build: {}", "none recorded".dimmed()),
    }

    let processes = ProcessController::new(SystemProcessTable);
    match processes.status(&config.process_name)? {
        ProcessHandle::Running { pid } => {
            println!("   {}: {} (pid {})", config.process_name, "running".green(), pid)
        }
        ProcessHandle::NotRunning => {
            println!("   {}: {}", config.process_name, "not running".dimmed())
        }
    }

    Ok(())
}
