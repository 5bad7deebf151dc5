use std::time::Duration;

use serde::{Deserialize, Serialize};
use shopdb_core::{
    CollectionSpec, DATABASE_NAME, EVENTS_COLLECTION, MongoSettings, ProvisionSpec,
    ValidationAction, ValidationLevel,
};

/// Default MongoDB endpoint
pub const DEFAULT_URI: &str = "mongodb://localhost:27017";

/// Application name reported to the server
pub const DEFAULT_APP_NAME: &str = "shopdb";

/// Default connect / server selection timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawShopdbConfig {
    #[serde(default)]
    pub mongodb: RawMongoConfig,

    #[serde(default)]
    pub provision: RawProvisionConfig,
}

/// MongoDB section as stored in TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMongoConfig {
    pub uri: Option<String>,
    pub app_name: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub server_selection_timeout_secs: Option<u64>,
}

/// Provision section as stored in TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawProvisionConfig {
    pub database: Option<String>,
    pub collection: Option<String>,
    pub strict: Option<bool>,
    pub validation_action: Option<ValidationAction>,
    pub validation_level: Option<ValidationLevel>,
    pub skip_indexes: Option<Vec<String>>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ShopdbConfig {
    #[serde(default)]
    pub mongodb: MongoConfig,

    #[serde(default)]
    pub provision: ProvisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MongoConfig {
    /// Connection string, credentials included
    pub uri: String,

    /// Application name reported to the server
    pub app_name: String,

    pub connect_timeout_secs: u64,

    pub server_selection_timeout_secs: u64,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            connect_timeout_secs: DEFAULT_TIMEOUT_SECS,
            server_selection_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionConfig {
    /// Target database
    pub database: String,

    /// Event collection name
    pub collection: String,

    /// Fail when the collection already exists
    pub strict: bool,

    pub validation_action: ValidationAction,

    pub validation_level: ValidationLevel,

    /// Planned indexes to leave out, by name
    pub skip_indexes: Vec<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            database: DATABASE_NAME.to_string(),
            collection: EVENTS_COLLECTION.to_string(),
            strict: false,
            validation_action: ValidationAction::default(),
            validation_level: ValidationLevel::default(),
            skip_indexes: Vec::new(),
        }
    }
}

impl ShopdbConfig {
    /// Driver settings for this configuration
    pub fn mongo_settings(&self) -> MongoSettings {
        let mut settings = MongoSettings::new(&self.mongodb.uri);
        settings.app_name = Some(self.mongodb.app_name.clone());
        settings.connect_timeout = Duration::from_secs(self.mongodb.connect_timeout_secs);
        settings.server_selection_timeout =
            Duration::from_secs(self.mongodb.server_selection_timeout_secs);
        settings
    }

    /// The event provisioning plan with configured names and overrides
    pub fn provision_spec(&self) -> ProvisionSpec {
        let base = ProvisionSpec::events();
        let collection = CollectionSpec::new(&self.provision.collection, base.collection.schema)
            .with_action(self.provision.validation_action)
            .with_level(self.provision.validation_level);

        ProvisionSpec {
            database: self.provision.database.clone(),
            collection,
            indexes: base.indexes,
        }
        .without_indexes(&self.provision.skip_indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ShopdbConfig::default();
        assert_eq!(config.mongodb.uri, DEFAULT_URI);
        assert_eq!(config.mongodb.app_name, "shopdb");
        assert_eq!(config.provision.database, "online_store");
        assert_eq!(config.provision.collection, "events");
        assert!(!config.provision.strict);
        assert_eq!(config.provision.validation_action, ValidationAction::Error);
        assert!(config.provision.skip_indexes.is_empty());
    }

    #[test]
    fn test_default_spec_is_canonical() {
        assert_eq!(
            ShopdbConfig::default().provision_spec(),
            ProvisionSpec::events()
        );
    }

    #[test]
    fn test_spec_applies_overrides() {
        let config = ShopdbConfig {
            provision: ProvisionConfig {
                database: "staging_store".into(),
                validation_action: ValidationAction::Warn,
                skip_indexes: vec!["timestamp_1_ttl".into()],
                ..Default::default()
            },
            ..Default::default()
        };

        let spec = config.provision_spec();
        assert_eq!(spec.database, "staging_store");
        assert_eq!(spec.collection.validation_action, ValidationAction::Warn);
        assert_eq!(spec.indexes.len(), 4);
    }

    #[test]
    fn test_mongo_settings_timeouts() {
        let config = ShopdbConfig {
            mongodb: MongoConfig {
                connect_timeout_secs: 3,
                server_selection_timeout_secs: 5,
                ..Default::default()
            },
            ..Default::default()
        };

        let settings = config.mongo_settings();
        assert_eq!(settings.connect_timeout, Duration::from_secs(3));
        assert_eq!(settings.server_selection_timeout, Duration::from_secs(5));
        assert_eq!(settings.app_name.as_deref(), Some("shopdb"));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ShopdbConfig {
            mongodb: MongoConfig {
                uri: "mongodb://db.internal:27017".into(),
                ..Default::default()
            },
            provision: ProvisionConfig {
                strict: true,
                validation_level: ValidationLevel::Moderate,
                ..Default::default()
            },
        };

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ShopdbConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
        assert!(toml_str.contains("validation_level = \"moderate\""));
    }

    #[test]
    fn test_raw_config_partial_parsing() {
        let toml_str = r#"
[provision]
strict = true
"#;
        let raw: RawShopdbConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(raw.provision.strict, Some(true));
        assert!(raw.provision.database.is_none());
        assert!(raw.mongodb.uri.is_none());
    }

    #[test]
    fn test_raw_config_rejects_unknown_action() {
        let toml_str = r#"
[provision]
validation_action = "ignore"
"#;
        assert!(toml::from_str::<RawShopdbConfig>(toml_str).is_err());
    }
}
