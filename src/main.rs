//! chatport - chat export to Teams migration
//!
//! Main entry point for the chatport CLI.

use anyhow::Context;
use blockkit::Export;
use chatport::config::{validate_config_result, MigrateConfig};
use chatport::dispatch::format_duration;
use chatport::mappings::StateMappings;
use chatport::migrate::{connect, Migration};
use chatport::shutdown::ShutdownCoordinator;
use chatport::{MigrateError, Result};
use clap::{Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

/// chatport - migrate an exported chat workspace into Teams
#[derive(Parser, Debug)]
#[command(name = "chatport")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ./chatport.yaml, then ~/.config/chatport/config.yaml)
    #[arg(short, long, env = "CHATPORT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a configuration file with every default filled in
    Init {
        /// Where to write it
        #[arg(default_value = "chatport.yaml")]
        path: PathBuf,
    },

    /// Read the export and queue every message for creation
    Plan,

    /// Create queued messages: thread parents first, then replies
    Dispatch,

    /// Take every mapped channel and team out of migration mode
    Finish {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show queue lengths and recorded references
    Status,

    /// Move dead-lettered items back into their queues
    RequeueFailed,
}

fn main() {
    if let Err(e) = chatport::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { path } => return handle_init_command(&path),

        Commands::Plan => {
            let (migration, coordinator) = open_migration(cli.config.as_deref())?;
            let paths = &migration.config().paths;
            let export = open_export(&paths.export_dir)?;
            let mappings = load_mappings(&paths.state_dir)?;
            // not wrapped in run_until_signal: plan only runs against empty
            // queues, so an interrupted plan is simply run again
            let outcome = migration.plan(&export, &mappings);
            coordinator.shutdown()?;
            let summary = outcome?;

            println!("Channels planned:   {}", summary.channels);
            println!("Channels skipped:   {}", summary.unmapped_channels);
            println!("Thread parents:     {}", summary.parents);
            println!("Replies:            {}", summary.children);
            if summary.skipped_messages > 0 {
                println!("Unreadable messages: {}", summary.skipped_messages);
            }
        }

        Commands::Dispatch => {
            let (migration, coordinator) = open_migration(cli.config.as_deref())?;
            let transport = connect(migration.config())?;
            let started = Instant::now();
            let runtime = tokio::runtime::Runtime::new()?;
            let summary =
                runtime.block_on(coordinator.run_until_signal(migration.dispatch(transport)))?;

            println!(
                "Dispatched {} items in {}",
                summary.total(),
                format_duration(started.elapsed())
            );
            println!("  created:   {}", summary.succeeded);
            println!("  existing:  {}", summary.conflicts);
            println!("  failed:    {}", summary.failed);
            if summary.failed > 0 {
                println!();
                println!("Run 'chatport requeue-failed' then 'chatport dispatch' to retry failures.");
            }
        }

        Commands::Finish { yes } => {
            let (migration, coordinator) = open_migration(cli.config.as_deref())?;
            let mappings = load_mappings(&migration.config().paths.state_dir)?;
            let channels = mappings.channels();

            if !yes && !confirm_finish(channels.len())? {
                println!("Aborted.");
                return Ok(());
            }

            let transport = connect(migration.config())?;
            let runtime = tokio::runtime::Runtime::new()?;
            let summary = runtime.block_on(
                coordinator.run_until_signal(migration.finish(&transport, channels)),
            )?;

            println!("Channels completed: {}", summary.channels);
            println!("Teams completed:    {}", summary.teams);
            if summary.failed > 0 {
                println!("Failed:             {}", summary.failed);
            }
        }

        Commands::Status => {
            let (migration, _) = open_migration(cli.config.as_deref())?;
            println!("{}", migration.status());
        }

        Commands::RequeueFailed => {
            let (migration, coordinator) = open_migration(cli.config.as_deref())?;
            let outcome = migration.requeue_failed();
            coordinator.shutdown()?;
            println!("Requeued {} items", outcome?);
        }
    }

    Ok(())
}

/// Load and validate the configuration, then open the run state
fn open_migration(config_path: Option<&Path>) -> Result<(Migration, ShutdownCoordinator)> {
    let config = match config_path {
        Some(path) => MigrateConfig::load(path)?,
        None => MigrateConfig::load_default()?,
    };
    validate_config_result(&config)?;

    let migration = Migration::open(config)?;
    let coordinator = ShutdownCoordinator::new();
    migration.register(&coordinator);
    Ok((migration, coordinator))
}

fn open_export(dir: &Path) -> anyhow::Result<Export> {
    Export::open(dir).with_context(|| format!("Failed to open export at {}", dir.display()))
}

fn load_mappings(dir: &Path) -> anyhow::Result<StateMappings> {
    StateMappings::load(dir)
        .with_context(|| format!("Failed to load mappings from {}", dir.display()))
}

fn handle_init_command(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(MigrateError::Config(format!(
            "{} already exists",
            path.display()
        )));
    }
    MigrateConfig::new().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn confirm_finish(channels: usize) -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Complete migration for {} channels? Imported channels cannot receive more history afterwards",
            channels
        ))
        .default(false)
        .interact()
        .map_err(|e| MigrateError::Other(format!("Failed to read confirmation: {}", e)))
}
