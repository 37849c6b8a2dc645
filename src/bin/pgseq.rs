//! pgseq: the migration sequence CLI
//!
//! # Usage
//!
//! ```bash
//! # Write migrations for every schema of the source connection
//! pgseq generate
//!
//! # Where does each database of a cluster stand?
//! pgseq version prod public
//!
//! # Apply everything pending on one database
//! pgseq up staging public
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use pgseq::commands::steps::StepAction;
use pgseq::commands::{self, OutputFormat, Workspace};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgseq")]
#[command(version)]
#[command(about = "Ordered Postgres migrations generated from a live schema", long_about = None)]
#[command(after_help = "EXAMPLES:
    pgseq generate public
    pgseq compare primary replica public
    pgseq make public primary staging
    pgseq run staging public 2")]
struct Cli {
    /// Config file (pgseq.yaml or .toml)
    #[arg(short, long, global = true, env = "PGSEQ_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate migrations from the source database
    Generate {
        /// Only this schema
        schema: Option<String>,
    },
    /// Applied version of every schema on a connection or cluster
    Version {
        /// Connection or cluster name
        target: String,
        schema: Option<String>,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Step distance between two databases
    Compare {
        source: String,
        compare: String,
        schema: Option<String>,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Bring every cluster member except the source fully up
    Sync {
        cluster: String,
        schema: String,
        /// Roll back dirty members before syncing
        #[arg(long)]
        repair: bool,
    },
    /// Step a destination forward until it matches a source
    Make {
        schema: String,
        source: String,
        destination: String,
        #[arg(long)]
        repair: bool,
    },
    /// Apply every pending migration
    Up {
        connection: String,
        schema: String,
        #[arg(long)]
        repair: bool,
    },
    /// Revert every applied migration
    Down {
        connection: String,
        schema: String,
        #[arg(long)]
        repair: bool,
    },
    /// Apply the next N migrations
    Run {
        connection: String,
        schema: String,
        steps: u64,
        #[arg(long)]
        repair: bool,
    },
    /// Revert the last N migrations
    Rollback {
        connection: String,
        schema: String,
        steps: u64,
        #[arg(long)]
        repair: bool,
    },
    /// Record a version as applied without running it
    Set {
        connection: String,
        schema: String,
        version: u64,
    },
    /// Repair a dirty version
    Clean { connection: String, schema: String },
    /// Drop every table in the schema
    Drop { connection: String, schema: String },
    /// Create an empty migration pair
    Create { schema: String, name: String },
    /// Check connections and pg_dump
    Test,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "pgseq=debug" } else { "pgseq=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ws = Workspace::load(cli.config.as_deref())?;

    let cancel = ws.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Generate { schema } => commands::generate::generate(&ws, schema.as_deref()).await,
        Commands::Version {
            target,
            schema,
            format,
        } => commands::status::version(&ws, &target, schema.as_deref(), format).await,
        Commands::Compare {
            source,
            compare,
            schema,
            format,
        } => commands::status::compare(&ws, &source, &compare, schema.as_deref(), format).await,
        Commands::Sync {
            cluster,
            schema,
            repair,
        } => commands::sync::sync(&ws, &cluster, &schema, repair).await,
        Commands::Make {
            schema,
            source,
            destination,
            repair,
        } => commands::sync::make(&ws, &schema, &source, &destination, repair).await,
        Commands::Up {
            connection,
            schema,
            repair,
        } => commands::steps::run(&ws, &connection, &schema, StepAction::Up, repair).await,
        Commands::Down {
            connection,
            schema,
            repair,
        } => commands::steps::run(&ws, &connection, &schema, StepAction::Down, repair).await,
        Commands::Run {
            connection,
            schema,
            steps,
            repair,
        } => commands::steps::run(&ws, &connection, &schema, StepAction::Run(steps), repair).await,
        Commands::Rollback {
            connection,
            schema,
            steps,
            repair,
        } => {
            commands::steps::run(&ws, &connection, &schema, StepAction::Rollback(steps), repair).await
        }
        Commands::Set {
            connection,
            schema,
            version,
        } => commands::steps::run(&ws, &connection, &schema, StepAction::Set(version), false).await,
        Commands::Clean { connection, schema } => {
            commands::steps::run(&ws, &connection, &schema, StepAction::Clean, false).await
        }
        Commands::Drop { connection, schema } => {
            commands::steps::run(&ws, &connection, &schema, StepAction::Drop, false).await
        }
        Commands::Create { schema, name } => commands::create::create(&ws, &schema, &name).await,
        Commands::Test => commands::check::check(&ws).await,
    }
}
