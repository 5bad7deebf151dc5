use super::types::{
    DEFAULT_APP_NAME, DEFAULT_TIMEOUT_SECS, DEFAULT_URI, MongoConfig, ProvisionConfig,
    RawMongoConfig, RawProvisionConfig, RawShopdbConfig, ShopdbConfig,
};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use shopdb_core::{DATABASE_NAME, EVENTS_COLLECTION};
use std::path::{Path, PathBuf};

/// Environment variable holding the MongoDB connection string
pub const URI_ENV: &str = "SHOPDB_MONGODB_URI";

/// Environment variable overriding the target database
pub const DATABASE_ENV: &str = "SHOPDB_DATABASE";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project + explicit file + environment)
    pub fn load(explicit: Option<&Path>) -> Result<ShopdbConfig> {
        let mut raw = RawShopdbConfig::default();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        // Layer 3: File given on the command line, which must exist
        if let Some(path) = explicit {
            raw = Self::merge_raw(raw, Self::read_raw(path)?);
        }

        // Layer 4: Environment
        raw = Self::apply_env(raw, |key| std::env::var(key).ok());

        Ok(Self::finalize(raw))
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "shopdb").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with SHOPDB_PROJECT_CONFIG_DIR env var (useful for isolated e2e tests)
    pub fn project_config_path() -> PathBuf {
        Self::project_config_path_in(std::env::var("SHOPDB_PROJECT_CONFIG_DIR").ok().as_deref())
    }

    fn project_config_path_in(override_dir: Option<&str>) -> PathBuf {
        match override_dir {
            Some(dir) => PathBuf::from(dir).join("config.toml"),
            None => PathBuf::from(".shopdb/config.toml"),
        }
    }

    fn read_raw(path: &Path) -> Result<RawShopdbConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawShopdbConfig, overlay: RawShopdbConfig) -> RawShopdbConfig {
        RawShopdbConfig {
            mongodb: RawMongoConfig {
                uri: overlay.mongodb.uri.or(base.mongodb.uri),
                app_name: overlay.mongodb.app_name.or(base.mongodb.app_name),
                connect_timeout_secs: overlay
                    .mongodb
                    .connect_timeout_secs
                    .or(base.mongodb.connect_timeout_secs),
                server_selection_timeout_secs: overlay
                    .mongodb
                    .server_selection_timeout_secs
                    .or(base.mongodb.server_selection_timeout_secs),
            },
            provision: RawProvisionConfig {
                database: overlay.provision.database.or(base.provision.database),
                collection: overlay.provision.collection.or(base.provision.collection),
                strict: overlay.provision.strict.or(base.provision.strict),
                validation_action: overlay
                    .provision
                    .validation_action
                    .or(base.provision.validation_action),
                validation_level: overlay
                    .provision
                    .validation_level
                    .or(base.provision.validation_level),
                skip_indexes: overlay.provision.skip_indexes.or(base.provision.skip_indexes),
            },
        }
    }

    /// Overlay environment variables onto the merged files
    fn apply_env(
        mut raw: RawShopdbConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> RawShopdbConfig {
        if let Some(uri) = lookup(URI_ENV).filter(|v| !v.is_empty()) {
            raw.mongodb.uri = Some(uri);
        }
        if let Some(database) = lookup(DATABASE_ENV).filter(|v| !v.is_empty()) {
            raw.provision.database = Some(database);
        }
        raw
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawShopdbConfig) -> ShopdbConfig {
        ShopdbConfig {
            mongodb: MongoConfig {
                uri: raw.mongodb.uri.unwrap_or_else(|| DEFAULT_URI.to_string()),
                app_name: raw
                    .mongodb
                    .app_name
                    .unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
                connect_timeout_secs: raw
                    .mongodb
                    .connect_timeout_secs
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
                server_selection_timeout_secs: raw
                    .mongodb
                    .server_selection_timeout_secs
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            },
            provision: ProvisionConfig {
                database: raw
                    .provision
                    .database
                    .unwrap_or_else(|| DATABASE_NAME.to_string()),
                collection: raw
                    .provision
                    .collection
                    .unwrap_or_else(|| EVENTS_COLLECTION.to_string()),
                strict: raw.provision.strict.unwrap_or(false),
                validation_action: raw.provision.validation_action.unwrap_or_default(),
                validation_level: raw.provision.validation_level.unwrap_or_default(),
                skip_indexes: raw.provision.skip_indexes.unwrap_or_default(),
            },
        }
    }

    /// Load a single config file with defaults applied (for testing)
    #[cfg(test)]
    pub fn load_from_path(path: &Path) -> Result<ShopdbConfig> {
        if path.exists() {
            Ok(Self::finalize(Self::read_raw(path)?))
        } else {
            Ok(ShopdbConfig::default())
        }
    }
}
