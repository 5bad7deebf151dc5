//! Declarative provisioning specs
//!
//! Everything the provisioner applies is described here as static data: the
//! target database, the collection with its validator, and the index set.

mod schema;

pub use schema::{
    BsonType, EventType, SchemaNode, SchemaRule, SchemaViolation, ViolationKind, event_schema,
};

use std::fmt;
use std::time::Duration;

use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Database holding the event collection
pub const DATABASE_NAME: &str = "online_store";

/// Collection receiving store events
pub const EVENTS_COLLECTION: &str = "events";

/// Events older than this (by `timestamp`) are eligible for expiry: 365 days
pub const EVENT_TTL: Duration = Duration::from_secs(31_536_000);

/// What the store does with a document that fails the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationAction {
    /// Reject the write
    #[default]
    Error,
    /// Accept the write and log a warning
    Warn,
}

/// Which writes the validator applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// All inserts and updates
    #[default]
    Strict,
    /// Inserts, and updates to documents that already pass
    Moderate,
    /// No validation
    Off,
}

/// A collection and the validator attached at creation
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub name: String,
    pub schema: SchemaRule,
    pub validation_action: ValidationAction,
    pub validation_level: ValidationLevel,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, schema: SchemaRule) -> Self {
        Self {
            name: name.into(),
            schema,
            validation_action: ValidationAction::default(),
            validation_level: ValidationLevel::default(),
        }
    }

    pub fn with_action(mut self, action: ValidationAction) -> Self {
        self.validation_action = action;
        self
    }

    pub fn with_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }
}

/// Index key order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }

    /// Read a key direction from an index catalog entry
    ///
    /// Servers report directions as int32, int64 or double depending on how
    /// the index was created. Non-directional keys (`"text"`, `"2dsphere"`)
    /// return `None`.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        let n = match value {
            Bson::Int32(n) => *n as f64,
            Bson::Int64(n) => *n as f64,
            Bson::Double(n) => *n,
            _ => return None,
        };
        if n > 0.0 {
            Some(Self::Ascending)
        } else if n < 0.0 {
            Some(Self::Descending)
        } else {
            None
        }
    }
}

/// One index definition: ordered keys plus options
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<(String, SortDirection)>,
    /// TTL threshold, declared as `expireAfterSeconds`
    pub expire_after: Option<Duration>,
    /// Every other option in server spelling (`unique`, `sparse`,
    /// `partialFilterExpression`, `collation`, `hidden`, ...). Boolean
    /// options are only present when true.
    pub options: Document,
}

impl IndexSpec {
    /// Single-field ascending index with the store's default name
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::single(field.into(), SortDirection::Ascending)
    }

    /// Single-field descending index with the store's default name
    pub fn descending(field: impl Into<String>) -> Self {
        Self::single(field.into(), SortDirection::Descending)
    }

    fn single(field: String, direction: SortDirection) -> Self {
        let keys = vec![(field, direction)];
        Self {
            name: Self::default_name(&keys),
            keys,
            expire_after: None,
            options: Document::new(),
        }
    }

    /// Build from an explicit name and key list
    pub fn compound(name: impl Into<String>, keys: Vec<(String, SortDirection)>) -> Self {
        Self {
            name: name.into(),
            keys,
            expire_after: None,
            options: Document::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    /// Set an option such as `unique` or `partialFilterExpression`
    ///
    /// A `false` boolean removes the option, matching how catalogs omit it.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        let key = key.into();
        match value.into() {
            Bson::Boolean(false) => {
                self.options.remove(&key);
            }
            value => {
                self.options.insert(key, value);
            }
        }
        self
    }

    /// `<field>_<dir>` joined with `_`, e.g. `data.user_id_1`
    pub fn default_name(keys: &[(String, SortDirection)]) -> String {
        keys.iter()
            .map(|(field, dir)| format!("{}_{}", field, dir.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// The key pattern document, e.g. `{ "timestamp": 1 }`
    pub fn key_document(&self) -> Document {
        let mut doc = Document::new();
        for (field, dir) in &self.keys {
            doc.insert(field.clone(), dir.as_i32());
        }
        doc
    }

    pub fn is_ttl(&self) -> bool {
        self.expire_after.is_some()
    }

    /// Same keys in the same order and the same options; the name is ignored
    ///
    /// Options compare regardless of their order in the document.
    pub fn same_definition(&self, other: &IndexSpec) -> bool {
        self.keys == other.keys
            && self.expire_after == other.expire_after
            && self.options.len() == other.options.len()
            && self
                .options
                .iter()
                .all(|(key, value)| other.options.get(key) == Some(value))
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (idx, (field, dir)) in self.keys.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field, dir.as_i32())?;
        }
        write!(f, " }}")?;
        if let Some(ttl) = self.expire_after {
            write!(f, " expireAfterSeconds={}", ttl.as_secs())?;
        }
        for (key, value) in &self.options {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Everything applied in one provisioning run
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionSpec {
    pub database: String,
    pub collection: CollectionSpec,
    pub indexes: Vec<IndexSpec>,
}

impl ProvisionSpec {
    /// `online_store.events` with its validator and five indexes
    pub fn events() -> Self {
        Self {
            database: DATABASE_NAME.to_string(),
            collection: CollectionSpec::new(EVENTS_COLLECTION, event_schema()),
            indexes: vec![
                IndexSpec::ascending("timestamp"),
                IndexSpec::ascending("event_type"),
                IndexSpec::ascending("data.user_id"),
                IndexSpec::ascending("data.product_id"),
                // Shares its key pattern with timestamp_1, so it needs its own name
                IndexSpec::ascending("timestamp")
                    .named("timestamp_1_ttl")
                    .expire_after(EVENT_TTL),
            ],
        }
    }

    /// Drop the named indexes from the plan
    pub fn without_indexes(mut self, names: &[String]) -> Self {
        self.indexes.retain(|index| !names.contains(&index.name));
        self
    }

    /// The index with the given name, if planned
    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Check the plan is self-consistent before it touches a store
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.database.is_empty() {
            problems.push("database name is empty".to_string());
        }
        if self.collection.name.is_empty() {
            problems.push("collection name is empty".to_string());
        }

        for (idx, index) in self.indexes.iter().enumerate() {
            if index.name.is_empty() {
                problems.push(format!("index #{idx} has no name"));
            } else if self.indexes[..idx].iter().any(|i| i.name == index.name) {
                problems.push(format!("index {} declared twice", index.name));
            }
            if index.keys.is_empty() {
                problems.push(format!("index {} has no keys", index.name));
            }
            if index.keys.iter().any(|(field, _)| field.is_empty()) {
                problems.push(format!("index {} has an empty key field", index.name));
            }
            if index.is_ttl() && index.keys.len() != 1 {
                problems.push(format!(
                    "index {}: TTL requires exactly one key field",
                    index.name
                ));
            }
        }

        if !problems.is_empty() {
            return Err(ProvisionError::ValidationSpec(problems.join("; ")));
        }

        self.collection.schema.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_events_spec_matches_layout() {
        let spec = ProvisionSpec::events();
        assert_eq!(spec.database, "online_store");
        assert_eq!(spec.collection.name, "events");
        assert_eq!(spec.collection.validation_action, ValidationAction::Error);
        assert_eq!(spec.collection.validation_level, ValidationLevel::Strict);

        let names: Vec<&str> = spec.indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "timestamp_1",
                "event_type_1",
                "data.user_id_1",
                "data.product_id_1",
                "timestamp_1_ttl",
            ]
        );
    }

    #[test]
    fn test_ttl_only_on_designated_index() {
        let spec = ProvisionSpec::events();
        let ttl: Vec<&IndexSpec> = spec.indexes.iter().filter(|i| i.is_ttl()).collect();
        assert_eq!(ttl.len(), 1);
        assert_eq!(ttl[0].name, "timestamp_1_ttl");
        assert_eq!(ttl[0].expire_after.unwrap().as_secs(), 31_536_000);
    }

    #[test]
    fn test_plain_and_ttl_timestamp_are_distinct() {
        let spec = ProvisionSpec::events();
        let plain = spec.index("timestamp_1").unwrap();
        let ttl = spec.index("timestamp_1_ttl").unwrap();
        assert_eq!(plain.keys, ttl.keys);
        assert!(!plain.same_definition(ttl));
    }

    #[test]
    fn test_events_spec_is_valid() {
        assert!(ProvisionSpec::events().validate().is_ok());
    }

    #[test]
    fn test_key_document_preserves_order() {
        let index = IndexSpec::compound(
            "by_user_time",
            vec![
                ("data.user_id".into(), SortDirection::Ascending),
                ("timestamp".into(), SortDirection::Descending),
            ],
        );
        let key_doc = index.key_document();
        let keys: Vec<(&String, &Bson)> = key_doc.iter().collect();
        assert_eq!(keys[0].0, "data.user_id");
        assert_eq!(keys[0].1, &Bson::Int32(1));
        assert_eq!(keys[1].0, "timestamp");
        assert_eq!(keys[1].1, &Bson::Int32(-1));
        assert_eq!(
            IndexSpec::default_name(&index.keys),
            "data.user_id_1_timestamp_-1"
        );
    }

    #[test]
    fn test_display_includes_ttl() {
        let index = IndexSpec::ascending("timestamp").expire_after(EVENT_TTL);
        assert_eq!(
            index.to_string(),
            "{ timestamp: 1 } expireAfterSeconds=31536000"
        );
    }

    #[test]
    fn test_options_are_part_of_the_definition() {
        let plain = IndexSpec::ascending("timestamp");
        let unique = IndexSpec::ascending("timestamp").with_option("unique", true);
        let partial = IndexSpec::ascending("timestamp")
            .with_option("partialFilterExpression", doc! { "event_type": "purchase" });

        assert!(!plain.same_definition(&unique));
        assert!(!unique.same_definition(&plain));
        assert!(!plain.same_definition(&partial));
        assert!(plain.same_definition(&IndexSpec::ascending("timestamp").with_option("sparse", false)));
        assert_eq!(unique.to_string(), "{ timestamp: 1 } unique=true");
    }

    #[test]
    fn test_option_order_is_ignored() {
        let a = IndexSpec::ascending("timestamp")
            .with_option("unique", true)
            .with_option("hidden", true);
        let b = IndexSpec::ascending("timestamp")
            .with_option("hidden", true)
            .with_option("unique", true);
        assert!(a.same_definition(&b));
    }

    #[test]
    fn test_direction_from_catalog_values() {
        assert_eq!(
            SortDirection::from_bson(&Bson::Int32(1)),
            Some(SortDirection::Ascending)
        );
        assert_eq!(
            SortDirection::from_bson(&Bson::Double(-1.0)),
            Some(SortDirection::Descending)
        );
        assert_eq!(SortDirection::from_bson(&Bson::String("text".into())), None);
    }

    #[test]
    fn test_duplicate_index_names_rejected() {
        let mut spec = ProvisionSpec::events();
        spec.indexes.push(IndexSpec::ascending("event_type"));
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("index event_type_1 declared twice"));
    }

    #[test]
    fn test_compound_ttl_rejected() {
        let mut spec = ProvisionSpec::events();
        spec.indexes.push(
            IndexSpec::compound(
                "bad_ttl",
                vec![
                    ("timestamp".into(), SortDirection::Ascending),
                    ("event_type".into(), SortDirection::Ascending),
                ],
            )
            .expire_after(EVENT_TTL),
        );
        assert!(matches!(
            spec.validate(),
            Err(ProvisionError::ValidationSpec(_))
        ));
    }

    #[test]
    fn test_without_indexes() {
        let spec = ProvisionSpec::events().without_indexes(&["timestamp_1_ttl".to_string()]);
        assert_eq!(spec.indexes.len(), 4);
        assert!(spec.indexes.iter().all(|i| !i.is_ttl()));
    }

    #[test]
    fn test_validation_enums_serde() {
        let action: ValidationAction = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(action, ValidationAction::Warn);
        let level: ValidationLevel = serde_json::from_str("\"moderate\"").unwrap();
        assert_eq!(level, ValidationLevel::Moderate);
    }
}
