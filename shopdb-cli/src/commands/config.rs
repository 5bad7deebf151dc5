use crate::config::ConfigLoader;
use anyhow::Result;
use clap::{Args, Subcommand};

use super::GlobalOpts;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration (merged, credentials masked)
    Show,
    /// Show configuration file paths
    Path,
}

pub fn run(args: ConfigArgs, globals: &GlobalOpts) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(globals),
        ConfigCommands::Path => show_paths(globals),
    }
}

fn show_config(globals: &GlobalOpts) -> Result<()> {
    let mut config = globals.load_config()?;
    config.mongodb.uri = config.mongo_settings().redacted_uri();
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{}", toml_str);
    Ok(())
}

fn show_paths(globals: &GlobalOpts) -> Result<()> {
    println!("User config:    {:?}", ConfigLoader::user_config_path());
    println!("Project config: {:?}", ConfigLoader::project_config_path());
    if let Some(path) = &globals.config {
        println!("Explicit:       {:?}", path);
    }
    Ok(())
}
