pub mod config;
pub mod provision;
pub mod schema;
pub mod verify;

use std::path::PathBuf;

use anyhow::{Context, Result};
use shopdb_core::MongoStore;
use tracing::info;

use crate::config::{ConfigLoader, ShopdbConfig};

/// Flags shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub config: Option<PathBuf>,
    pub uri: Option<String>,
}

impl GlobalOpts {
    /// Merged configuration with command-line overrides on top
    pub fn load_config(&self) -> Result<ShopdbConfig> {
        let mut config = ConfigLoader::load(self.config.as_deref())?;
        if let Some(uri) = &self.uri {
            config.mongodb.uri = uri.clone();
        }
        Ok(config)
    }
}

/// Build a client for the configured deployment
async fn connect(config: &ShopdbConfig) -> Result<MongoStore> {
    let settings = config.mongo_settings();
    info!(uri = %settings.redacted_uri(), "connecting to MongoDB");
    MongoStore::connect(&settings)
        .await
        .with_context(|| format!("connecting to {}", settings.redacted_uri()))
}
