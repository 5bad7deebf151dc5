//! Storage seam for provisioning
//!
//! [`DocumentStore`] is a connected client; [`DatabaseHandle`] is one database
//! selected from it. The provisioner only talks to these traits, so the
//! MongoDB backend and the in-memory backend are interchangeable.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::{MongoDatabase, MongoSettings, MongoStore};

use async_trait::async_trait;
use mongodb::bson::Document;

use crate::error::Result;
use crate::spec::{CollectionSpec, IndexSpec};

/// A connected document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Round-trip to the server; fails with `Connection` when unreachable
    async fn ping(&self) -> Result<()>;

    /// Select a database by name
    fn database(&self, name: &str) -> Box<dyn DatabaseHandle>;
}

/// Operations on one database
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    fn name(&self) -> &str;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Create a collection with its validator; `AlreadyExists` if present
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Index catalog of a collection, without the implicit `_id_` index
    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>>;

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<()>;

    /// Insert one document; `DocumentRejected` when the validator refuses it
    async fn insert_one(&self, collection: &str, document: Document) -> Result<()>;
}
