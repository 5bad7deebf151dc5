use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;

use commands::GlobalOpts;

#[derive(Parser)]
#[command(name = "shopdb", about = "Provision the online store event collection")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file layered over the user and project config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// MongoDB connection string (overrides config and SHOPDB_MONGODB_URI)
    #[arg(long, global = true)]
    uri: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the collection, validator and indexes if missing
    Provision(commands::provision::ProvisionArgs),
    /// Check the deployment against the plan without changing it
    Verify(commands::verify::VerifyArgs),
    /// Print the validator and index plan
    Schema(commands::schema::SchemaArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let globals = GlobalOpts {
        config: cli.config,
        uri: cli.uri,
    };

    match cli.command {
        Commands::Provision(args) => commands::provision::run(args, &globals).await,
        Commands::Verify(args) => commands::verify::run(args, &globals).await,
        Commands::Schema(args) => commands::schema::run(args, &globals),
        Commands::Config(args) => commands::config::run(args, &globals),
    }
}
