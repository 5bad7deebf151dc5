//! In-memory document store
//!
//! Emulates the parts of the engine the provisioner depends on: collections
//! with validators, an index catalog, validator enforcement on insert and the
//! TTL sweep. Faults can be injected to exercise failure and recovery paths.
//!
//! By default the catalog accepts two indexes with the same key pattern and
//! different options as long as their names differ. MongoDB refuses that
//! (IndexOptionsConflict, code 85) unless the two differ in collation or
//! partial filter; [`MemoryStore::reject_shared_key_patterns`] turns the same
//! rule on here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{DatabaseHandle, DocumentStore};
use crate::error::{ProvisionError, Result};
use crate::spec::{CollectionSpec, IndexSpec, ValidationAction, ValidationLevel};

#[derive(Default)]
struct MemoryCollection {
    /// `None` for collections created implicitly by a write or an index
    spec: Option<CollectionSpec>,
    indexes: Vec<IndexSpec>,
    documents: Vec<Document>,
}

#[derive(Default)]
struct MemoryState {
    unreachable: bool,
    shared_key_patterns_rejected: bool,
    /// Remaining index creations before an injected failure
    index_budget: Option<usize>,
    databases: HashMap<String, HashMap<String, MemoryCollection>>,
}

impl MemoryState {
    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable {
            Err(ProvisionError::Connection(
                "memory store marked unreachable".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn collection(&self, database: &str, collection: &str) -> Option<&MemoryCollection> {
        self.databases.get(database)?.get(collection)
    }

    fn collection_mut(&mut self, database: &str, collection: &str) -> &mut MemoryCollection {
        self.databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
    }
}

/// Shared in-memory store; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a connection error
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Let `count` more index creations succeed, then fail the next ones
    pub async fn fail_index_creation_after(&self, count: usize) {
        self.state.lock().await.index_budget = Some(count);
    }

    /// Refuse a new index whose key pattern another index already uses
    pub async fn reject_shared_key_patterns(&self, reject: bool) {
        self.state.lock().await.shared_key_patterns_rejected = reject;
    }

    /// Remove all injected faults
    pub async fn clear_faults(&self) {
        let mut state = self.state.lock().await;
        state.unreachable = false;
        state.index_budget = None;
    }

    /// Collection names in a database, sorted
    pub async fn collection_names(&self, database: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state
            .databases
            .get(database)
            .map(|colls| colls.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// The spec a collection was created with
    pub async fn collection_spec(&self, database: &str, collection: &str) -> Option<CollectionSpec> {
        let state = self.state.lock().await;
        state.collection(database, collection)?.spec.clone()
    }

    /// Snapshot of the stored documents
    pub async fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        let state = self.state.lock().await;
        state
            .collection(database, collection)
            .map(|coll| coll.documents.clone())
            .unwrap_or_default()
    }

    /// Run one TTL pass: delete documents whose TTL field is older than the
    /// index threshold at `now`. Returns the number of deleted documents.
    pub async fn expire_documents(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let mut state = self.state.lock().await;
        let mut removed = 0;

        for (db_name, collections) in state.databases.iter_mut() {
            for (coll_name, coll) in collections.iter_mut() {
                let rules: Vec<(String, Duration)> = coll
                    .indexes
                    .iter()
                    .filter_map(|index| {
                        let ttl = index.expire_after?;
                        let (field, _) = index.keys.first()?;
                        Some((field.clone(), ttl))
                    })
                    .collect();
                if rules.is_empty() {
                    continue;
                }

                let before = coll.documents.len();
                coll.documents.retain(|doc| {
                    !rules.iter().any(|(field, ttl)| match lookup(doc, field) {
                        Some(Bson::DateTime(at)) => {
                            now_ms.saturating_sub(at.timestamp_millis())
                                > i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
                        }
                        _ => false,
                    })
                });
                let expired = before - coll.documents.len();
                if expired > 0 {
                    debug!(database = %db_name, collection = %coll_name, expired, "TTL sweep");
                }
                removed += expired;
            }
        }

        removed
    }
}

/// Whether MongoDB lets two indexes share a key pattern
fn distinguishable(a: &IndexSpec, b: &IndexSpec) -> bool {
    ["collation", "partialFilterExpression"]
        .iter()
        .any(|key| a.options.get(key) != b.options.get(key))
}

/// Resolve a dotted path through nested documents
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.state.lock().await.ensure_reachable()
    }

    fn database(&self, name: &str) -> Box<dyn DatabaseHandle> {
        Box::new(MemoryDatabase {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

/// One database inside a [`MemoryStore`]
pub struct MemoryDatabase {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl DatabaseHandle for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let state = self.state.lock().await;
        state.ensure_reachable()?;
        Ok(state.collection(&self.name, name).is_some())
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_reachable()?;
        if state.collection(&self.name, &spec.name).is_some() {
            return Err(ProvisionError::AlreadyExists {
                database: self.name.clone(),
                collection: spec.name.clone(),
            });
        }
        spec.schema.check()?;

        state.collection_mut(&self.name, &spec.name).spec = Some(spec.clone());
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let state = self.state.lock().await;
        state.ensure_reachable()?;
        Ok(state
            .collection(&self.name, collection)
            .map(|coll| coll.indexes.clone())
            .unwrap_or_default())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_reachable()?;

        if let Some(remaining) = state.index_budget.as_mut() {
            if *remaining == 0 {
                return Err(ProvisionError::Connection(format!(
                    "injected failure creating index {}",
                    index.name
                )));
            }
            *remaining -= 1;
        }

        let reject_shared = state.shared_key_patterns_rejected;
        let coll = state.collection_mut(&self.name, collection);

        if let Some(existing) = coll.indexes.iter().find(|i| i.name == index.name) {
            if existing.same_definition(index) {
                return Ok(());
            }
            return Err(ProvisionError::IndexConflict {
                collection: collection.to_string(),
                name: index.name.clone(),
                existing: existing.to_string(),
                requested: index.to_string(),
            });
        }

        if let Some(existing) = coll.indexes.iter().find(|i| i.same_definition(index)) {
            return Err(ProvisionError::IndexConflict {
                collection: collection.to_string(),
                name: index.name.clone(),
                existing: format!("{} named {}", existing, existing.name),
                requested: index.to_string(),
            });
        }

        if reject_shared
            && let Some(existing) = coll
                .indexes
                .iter()
                .find(|i| i.keys == index.keys && !distinguishable(i, index))
        {
            return Err(ProvisionError::IndexConflict {
                collection: collection.to_string(),
                name: index.name.clone(),
                existing: format!("{} named {}", existing, existing.name),
                requested: index.to_string(),
            });
        }

        coll.indexes.push(index.clone());
        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_reachable()?;
        let coll = state.collection_mut(&self.name, collection);

        if let Some(spec) = &coll.spec
            && spec.validation_level != ValidationLevel::Off
        {
            let violations = spec.schema.evaluate(&document);
            if !violations.is_empty() {
                let reason = violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                match spec.validation_action {
                    ValidationAction::Error => {
                        return Err(ProvisionError::DocumentRejected(reason));
                    }
                    ValidationAction::Warn => {
                        warn!(collection, %reason, "document failed validation, accepted");
                    }
                }
            }
        }

        coll.documents.push(document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{EVENT_TTL, event_schema};
    use mongodb::bson::doc;

    fn events() -> CollectionSpec {
        CollectionSpec::new("events", event_schema())
    }

    #[tokio::test]
    async fn test_create_collection_twice_is_already_exists() {
        let store = MemoryStore::new();
        let db = store.database("online_store");

        db.create_collection(&events()).await.unwrap();
        let err = db.create_collection(&events()).await.unwrap_err();

        assert!(matches!(err, ProvisionError::AlreadyExists { .. }));
        assert!(db.collection_exists("events").await.unwrap());
    }

    #[tokio::test]
    async fn test_same_name_identical_index_is_noop() {
        let store = MemoryStore::new();
        let db = store.database("online_store");
        let index = IndexSpec::ascending("event_type");

        db.create_index("events", &index).await.unwrap();
        db.create_index("events", &index).await.unwrap();

        assert_eq!(db.list_indexes("events").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_name_different_keys_conflicts() {
        let store = MemoryStore::new();
        let db = store.database("online_store");

        db.create_index("events", &IndexSpec::descending("timestamp").named("timestamp_1"))
            .await
            .unwrap();
        let err = db
            .create_index("events", &IndexSpec::ascending("timestamp"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::IndexConflict { .. }));
    }

    #[tokio::test]
    async fn test_same_keys_different_options_coexist() {
        let store = MemoryStore::new();
        let db = store.database("online_store");

        db.create_index("events", &IndexSpec::ascending("timestamp"))
            .await
            .unwrap();
        db.create_index(
            "events",
            &IndexSpec::ascending("timestamp")
                .named("timestamp_1_ttl")
                .expire_after(EVENT_TTL),
        )
        .await
        .unwrap();

        assert_eq!(db.list_indexes("events").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shared_key_pattern_rejected_when_enabled() {
        let store = MemoryStore::new();
        store.reject_shared_key_patterns(true).await;
        let db = store.database("online_store");

        db.create_index("events", &IndexSpec::ascending("timestamp"))
            .await
            .unwrap();
        let err = db
            .create_index(
                "events",
                &IndexSpec::ascending("timestamp")
                    .named("timestamp_1_ttl")
                    .expire_after(EVENT_TTL),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::IndexConflict { ref name, .. } if name == "timestamp_1_ttl"));
        assert_eq!(db.list_indexes("events").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shared_key_pattern_allowed_with_partial_filter() {
        let store = MemoryStore::new();
        store.reject_shared_key_patterns(true).await;
        let db = store.database("online_store");

        db.create_index("events", &IndexSpec::ascending("timestamp"))
            .await
            .unwrap();
        db.create_index(
            "events",
            &IndexSpec::ascending("timestamp")
                .named("purchases_by_time")
                .with_option("partialFilterExpression", doc! { "event_type": "purchase" }),
        )
        .await
        .unwrap();

        assert_eq!(db.list_indexes("events").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_name_different_options_conflicts() {
        let store = MemoryStore::new();
        let db = store.database("online_store");

        db.create_index("events", &IndexSpec::ascending("timestamp").with_option("unique", true))
            .await
            .unwrap();
        let err = db
            .create_index("events", &IndexSpec::ascending("timestamp"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::IndexConflict { .. }));
    }

    #[tokio::test]
    async fn test_ttl_sweep_tolerates_extreme_dates() {
        let store = MemoryStore::new();
        let db = store.database("online_store");
        db.create_index(
            "events",
            &IndexSpec::ascending("timestamp").expire_after(EVENT_TTL),
        )
        .await
        .unwrap();
        db.insert_one("events", doc! { "timestamp": mongodb::bson::DateTime::MIN })
            .await
            .unwrap();
        db.insert_one("events", doc! { "timestamp": mongodb::bson::DateTime::MAX })
            .await
            .unwrap();

        assert_eq!(store.expire_documents(Utc::now()).await, 1);
    }

    #[tokio::test]
    async fn test_injected_index_failure() {
        let store = MemoryStore::new();
        let db = store.database("online_store");
        store.fail_index_creation_after(1).await;

        db.create_index("events", &IndexSpec::ascending("a"))
            .await
            .unwrap();
        let err = db
            .create_index("events", &IndexSpec::ascending("b"))
            .await
            .unwrap_err();
        assert!(err.is_connection());

        store.clear_faults().await;
        db.create_index("events", &IndexSpec::ascending("b"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_fails_everything() {
        let store = MemoryStore::new();
        store.set_unreachable(true).await;

        assert!(store.ping().await.unwrap_err().is_connection());
        let db = store.database("online_store");
        assert!(db.collection_exists("events").await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_warn_action_accepts_invalid_document() {
        let store = MemoryStore::new();
        let db = store.database("online_store");
        db.create_collection(&events().with_action(ValidationAction::Warn))
            .await
            .unwrap();

        db.insert_one("events", doc! { "event_type": "nope" })
            .await
            .unwrap();

        assert_eq!(store.documents("online_store", "events").await.len(), 1);
    }

    #[tokio::test]
    async fn test_level_off_skips_validation() {
        let store = MemoryStore::new();
        let db = store.database("online_store");
        db.create_collection(&events().with_level(ValidationLevel::Off))
            .await
            .unwrap();

        db.insert_one("events", doc! { "anything": true })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ttl_sweep_removes_only_expired() {
        let store = MemoryStore::new();
        let db = store.database("online_store");
        db.create_index(
            "events",
            &IndexSpec::ascending("timestamp")
                .named("timestamp_1_ttl")
                .expire_after(Duration::from_secs(60)),
        )
        .await
        .unwrap();

        let now = Utc::now();
        let old = mongodb::bson::DateTime::from_millis(now.timestamp_millis() - 120_000);
        let fresh = mongodb::bson::DateTime::from_millis(now.timestamp_millis() - 10_000);
        db.insert_one("events", doc! { "n": 1, "timestamp": old })
            .await
            .unwrap();
        db.insert_one("events", doc! { "n": 2, "timestamp": fresh })
            .await
            .unwrap();
        db.insert_one("events", doc! { "n": 3, "timestamp": "not a date" })
            .await
            .unwrap();

        assert_eq!(store.expire_documents(now).await, 1);
        let left: Vec<i32> = store
            .documents("online_store", "events")
            .await
            .iter()
            .map(|d| d.get_i32("n").unwrap())
            .collect();
        assert_eq!(left, [2, 3]);
    }

    #[test]
    fn test_lookup_nested_path() {
        let doc = doc! { "data": { "user_id": 5 } };
        assert_eq!(lookup(&doc, "data.user_id"), Some(&Bson::Int32(5)));
        assert_eq!(lookup(&doc, "data.missing"), None);
        assert_eq!(lookup(&doc, "data.user_id.deeper"), None);
    }
}
