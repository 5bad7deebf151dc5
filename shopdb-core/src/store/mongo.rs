//! MongoDB implementation of the store seam
//!
//! Wraps the official driver. Server error codes are mapped onto
//! [`ProvisionError`] so callers can tell "already there" from "drifted" from
//! "unreachable".

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{self, Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{
    ClientOptions, Collation, IndexOptions, ValidationAction as MongoValidationAction,
    ValidationLevel as MongoValidationLevel,
};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{debug, instrument};

use super::{DatabaseHandle, DocumentStore};
use crate::error::{ProvisionError, Result};
use crate::spec::{CollectionSpec, IndexSpec, SortDirection, ValidationAction, ValidationLevel};

// Server error codes
const BAD_VALUE: i32 = 2;
const FAILED_TO_PARSE: i32 = 9;
const NAMESPACE_NOT_FOUND: i32 = 26;
const NAMESPACE_EXISTS: i32 = 48;
const INDEX_ALREADY_EXISTS: i32 = 68;
const INVALID_OPTIONS: i32 = 72;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
const DOCUMENT_VALIDATION_FAILURE: i32 = 121;

/// Default connect and server-selection timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for [`MongoStore::connect`]
#[derive(Clone, PartialEq)]
pub struct MongoSettings {
    pub uri: String,
    pub app_name: Option<String>,
    pub connect_timeout: Duration,
    pub server_selection_timeout: Duration,
}

impl MongoSettings {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            app_name: None,
            connect_timeout: DEFAULT_TIMEOUT,
            server_selection_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// The URI with any credentials masked, safe for logs
    pub fn redacted_uri(&self) -> String {
        redact_uri(&self.uri)
    }
}

impl fmt::Debug for MongoSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoSettings")
            .field("uri", &self.redacted_uri())
            .field("app_name", &self.app_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("server_selection_timeout", &self.server_selection_timeout)
            .finish()
    }
}

fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let rest = &uri[scheme_end + 3..];
    let host_end = rest.find('/').unwrap_or(rest.len());
    match rest[..host_end].rfind('@') {
        Some(at) => format!("{}://***@{}", &uri[..scheme_end], &rest[at + 1..]),
        None => uri.to_string(),
    }
}

fn server_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        _ => None,
    }
}

/// Map driver errors that carry no provisioning-specific meaning
fn classify(err: MongoError) -> ProvisionError {
    match err.kind.as_ref() {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::Authentication { .. } => ProvisionError::Connection(err.to_string()),
        _ => ProvisionError::Database(err.to_string()),
    }
}

/// Convert a catalog entry; `None` for `_id_` and non-directional indexes
fn index_from_model(model: IndexModel) -> Option<IndexSpec> {
    let mut keys = Vec::with_capacity(model.keys.len());
    for (field, value) in &model.keys {
        let Some(direction) = SortDirection::from_bson(value) else {
            debug!(field = %field, "skipping non-directional index key");
            return None;
        };
        keys.push((field.clone(), direction));
    }

    let options = model.options.unwrap_or_default();
    let extra = catalog_options(&options);
    let name = options
        .name
        .unwrap_or_else(|| IndexSpec::default_name(&keys));
    if name == "_id_" {
        return None;
    }

    Some(IndexSpec {
        name,
        keys,
        expire_after: options.expire_after,
        options: extra,
    })
}

/// Options that change what an index enforces or serves, in server spelling.
/// Build-time settings (`v`, `background`) are left out.
fn catalog_options(options: &IndexOptions) -> Document {
    let mut extra = Document::new();
    for (key, flag) in [
        ("unique", options.unique),
        ("sparse", options.sparse),
        ("hidden", options.hidden),
    ] {
        if flag == Some(true) {
            extra.insert(key, true);
        }
    }
    if let Some(filter) = &options.partial_filter_expression {
        extra.insert("partialFilterExpression", filter.clone());
    }
    if let Some(collation) = &options.collation {
        match bson::to_document(collation) {
            Ok(collation) => {
                extra.insert("collation", collation);
            }
            Err(err) => debug!(error = %err, "unreadable index collation"),
        }
    }
    if let Some(projection) = &options.wildcard_projection {
        extra.insert("wildcardProjection", projection.clone());
    }
    if let Some(engine) = &options.storage_engine {
        extra.insert("storageEngine", engine.clone());
    }
    extra
}

fn index_to_model(index: &IndexSpec) -> IndexModel {
    let mut options = IndexOptions::builder()
        .name(index.name.clone())
        .expire_after(index.expire_after)
        .build();
    let extra = &index.options;
    options.unique = extra.get_bool("unique").ok();
    options.sparse = extra.get_bool("sparse").ok();
    options.hidden = extra.get_bool("hidden").ok();
    options.partial_filter_expression = extra.get_document("partialFilterExpression").ok().cloned();
    options.collation = extra
        .get_document("collation")
        .ok()
        .and_then(|doc| bson::from_document::<Collation>(doc.clone()).ok());
    options.wildcard_projection = extra.get_document("wildcardProjection").ok().cloned();
    options.storage_engine = extra.get_document("storageEngine").ok().cloned();
    IndexModel::builder()
        .keys(index.key_document())
        .options(options)
        .build()
}

/// A connected MongoDB client
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Build a client from settings; no round-trip happens until first use
    pub async fn connect(settings: &MongoSettings) -> Result<Self> {
        let mut options = ClientOptions::parse(&settings.uri).await.map_err(|e| {
            ProvisionError::Connection(format!(
                "invalid connection string {}: {e}",
                settings.redacted_uri()
            ))
        })?;
        if settings.app_name.is_some() {
            options.app_name = settings.app_name.clone();
        }
        options.connect_timeout = Some(settings.connect_timeout);
        options.server_selection_timeout = Some(settings.server_selection_timeout);

        let client = Client::with_options(options).map_err(classify)?;
        debug!(uri = %settings.redacted_uri(), "mongodb client created");
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    #[instrument(skip(self), level = "debug")]
    async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(classify)?;
        Ok(())
    }

    fn database(&self, name: &str) -> Box<dyn DatabaseHandle> {
        Box::new(MongoDatabase {
            db: self.client.database(name),
        })
    }
}

/// One database on a MongoDB deployment
pub struct MongoDatabase {
    db: Database,
}

impl MongoDatabase {
    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }
}

#[async_trait]
impl DatabaseHandle for MongoDatabase {
    fn name(&self) -> &str {
        self.db.name()
    }

    #[instrument(skip(self), level = "debug")]
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .db
            .list_collection_names()
            .filter(doc! { "name": name })
            .await
            .map_err(classify)?;
        Ok(names.iter().any(|n| n == name))
    }

    #[instrument(skip(self, spec), fields(collection = %spec.name), level = "debug")]
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let action = match spec.validation_action {
            ValidationAction::Error => MongoValidationAction::Error,
            ValidationAction::Warn => MongoValidationAction::Warn,
        };
        let level = match spec.validation_level {
            ValidationLevel::Strict => MongoValidationLevel::Strict,
            ValidationLevel::Moderate => MongoValidationLevel::Moderate,
            ValidationLevel::Off => MongoValidationLevel::Off,
        };

        self.db
            .create_collection(&spec.name)
            .validator(spec.schema.to_validator())
            .validation_action(action)
            .validation_level(level)
            .await
            .map_err(|err| match server_code(&err) {
                Some(NAMESPACE_EXISTS) => ProvisionError::AlreadyExists {
                    database: self.db.name().to_string(),
                    collection: spec.name.clone(),
                },
                Some(BAD_VALUE | FAILED_TO_PARSE | INVALID_OPTIONS) => {
                    ProvisionError::ValidationSpec(err.to_string())
                }
                _ => classify(err),
            })
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let cursor = match self.collection(collection).list_indexes().await {
            Ok(cursor) => cursor,
            Err(err) if server_code(&err) == Some(NAMESPACE_NOT_FOUND) => return Ok(Vec::new()),
            Err(err) => return Err(classify(err)),
        };
        let models: Vec<IndexModel> = cursor.try_collect().await.map_err(classify)?;
        Ok(models.into_iter().filter_map(index_from_model).collect())
    }

    #[instrument(skip(self, index), fields(index = %index.name), level = "debug")]
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        self.collection(collection)
            .create_index(index_to_model(index))
            .await
            .map(|_| ())
            .map_err(|err| match server_code(&err) {
                Some(INDEX_OPTIONS_CONFLICT | INDEX_KEY_SPECS_CONFLICT | INDEX_ALREADY_EXISTS) => {
                    ProvisionError::IndexConflict {
                        collection: collection.to_string(),
                        name: index.name.clone(),
                        existing: err.to_string(),
                        requested: index.to_string(),
                    }
                }
                _ => classify(err),
            })
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        self.collection(collection)
            .insert_one(document)
            .await
            .map(|_| ())
            .map_err(|err| match server_code(&err) {
                Some(DOCUMENT_VALIDATION_FAILURE) => ProvisionError::DocumentRejected(err.to_string()),
                _ => classify(err),
            })
    }
}
