//! oxide-reconcile CLI
//!
//! Command-line tool for converging a SQLite database on a schema file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_reconcile::prelude::*;

/// Reconcile a SQLite database with a desired schema definition.
#[derive(Parser)]
#[command(name = "oxide-reconcile")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Schema definition file (plain SQL).
    #[arg(short, long, env = "SCHEMA_FILE", default_value = "schema.sql")]
    schema: PathBuf,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the database in line with the schema file.
    Migrate {
        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the changes a migration would make.
    Plan {
        /// Print the plan as JSON instead of SQL.
        #[arg(long)]
        json: bool,
    },

    /// Print the introspected schema as JSON.
    Inspect {
        /// Inspect the schema file instead of the database.
        #[arg(long)]
        desired: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Cannot install logger: {}", err);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            let code = err
                .downcast_ref::<MigrateError>()
                .map_or(1, MigrateError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Migrate { dry_run } => {
            if dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
            }

            let definition = load_definition(&cli.schema)?;
            let engine = MigrationEngine::with_options(MigrationOptions::new().dry_run(dry_run));
            let report = engine.migrate(&cli.database, &definition).await?;

            if report.is_noop() {
                info!("Nothing to do.");
            } else if cli.verbose {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                info!(
                    created = report.tables_created.len(),
                    dropped = report.tables_dropped.len(),
                    rebuilt = report.tables_rebuilt.len(),
                    "Done"
                );
            }
        }

        Commands::Plan { json } => {
            let definition = load_definition(&cli.schema)?;
            let mut desired_db = desired_from_definition(&definition).await?;
            let mut target = connect(&cli.database).await?;

            let desired = introspect(&mut desired_db).await?;
            let current = introspect(&mut target).await?;
            let plan = MigrationEngine::new().plan(&desired, &current)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else if plan.is_empty() {
                info!("Schema is up to date.");
            } else {
                for sql in plan.statements() {
                    println!("{};", sql);
                }
            }
        }

        Commands::Inspect { desired } => {
            let mut conn = if desired {
                desired_from_definition(&load_definition(&cli.schema)?).await?
            } else {
                connect(&cli.database).await?
            };
            let model = introspect(&mut conn).await?;
            println!("{}", serde_json::to_string_pretty(&model)?);
        }
    }

    Ok(())
}
