//! Tidemark Migration CLI Tool
//!
//! Command-line interface for creating migration units and moving a PostgreSQL
//! schema up, down, or in sync with the migrations directory.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use tidemark::migration::{Direction, Migrator};
use tidemark_migrate::{commands, CommandError, Overrides};

#[derive(Parser)]
#[command(name = "tidemark-migrate")]
#[command(about = "Timestamp-ordered schema migrations for PostgreSQL")]
#[command(version)]
struct Cli {
    /// Configuration file (default: config/tidemark.toml, optional)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Migrations directory path
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Ledger table name
    #[arg(long, global = true)]
    ledger_table: Option<String>,

    /// Target database name
    #[arg(long, global = true)]
    database: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Show what would be executed without running anything
    #[arg(long)]
    dry_run: bool,

    /// Migration to stop at (full name)
    #[arg(long)]
    target: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new migration file
    Create {
        /// Migration name (e.g., "create_users_table")
        name: String,

        /// Timestamp to use instead of the current time
        timestamp: Option<String>,
    },

    /// Apply the next migration, or every migration up to --target
    Up(RunArgs),

    /// Revert the current migration, or every migration above --target
    Down(RunArgs),

    /// Apply every pending migration
    Sync(RunArgs),

    /// Drop and recreate the database with an empty ledger
    Reset {
        /// Show what would be executed without running anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show migration status (applied vs pending)
    Status,

    /// Delete a migration file and its ledger entry
    Remove {
        /// Full migration name
        name: String,
    },

    /// Rename a migration, keeping its ledger entry in step
    Rename {
        /// Current full name
        name: String,

        /// New full name
        new_name: String,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // One worker is enough for a single blocking connection
    may::config().set_workers(1);

    if let Err(err) = run(cli) {
        report(&err);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        config_path: cli.config,
        migrations_dir: cli.migrations_dir,
        ledger_table: cli.ledger_table,
        database: cli.database,
    };
    let config = overrides.resolve()?;
    let mut out = io::stdout().lock();

    if let Commands::Config = cli.command {
        commands::show_config(&config, &mut out)?;
        return Ok(());
    }

    if let Commands::Create { .. } = cli.command {
        std::fs::create_dir_all(&config.migrations.directory).with_context(|| {
            format!(
                "failed to create migrations directory {}",
                config.migrations.directory.display()
            )
        })?;
    }

    let mut migrator = Migrator::from_config(&config).map_err(CommandError::from)?;

    match cli.command {
        Commands::Create { name, timestamp } => {
            commands::create(&migrator, &name, timestamp.as_deref(), &mut out)?;
        }
        Commands::Up(args) => run_direction(&mut migrator, Direction::Up, args, &mut out)?,
        Commands::Down(args) => run_direction(&mut migrator, Direction::Down, args, &mut out)?,
        Commands::Sync(args) => run_direction(&mut migrator, Direction::Sync, args, &mut out)?,
        Commands::Reset { dry_run } => {
            commands::migrate(&mut migrator, Direction::Reset, dry_run, None, &mut out)?;
        }
        Commands::Status => commands::status(&mut migrator, &mut out)?,
        Commands::Remove { name } => commands::remove(&mut migrator, &name, &mut out)?,
        Commands::Rename { name, new_name } => {
            commands::rename(&mut migrator, &name, &new_name, &mut out)?;
        }
        Commands::Config => {}
    }

    out.flush()?;
    Ok(())
}

fn run_direction(
    migrator: &mut Migrator<tidemark::PostgresDatabase>,
    direction: Direction,
    args: RunArgs,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    commands::migrate(migrator, direction, args.dry_run, args.target.as_deref(), out)
}

fn report(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let operator_facing = err
        .downcast_ref::<CommandError>()
        .is_some_and(CommandError::is_operator_facing);
    if !operator_facing {
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
}
