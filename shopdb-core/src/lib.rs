//! Idempotent provisioning for the online store event collection.
//!
//! The crate describes the `online_store.events` collection as static data
//! (validator plus index set) and applies it to a document store:
//!
//! - **Specs** ([`ProvisionSpec`], [`CollectionSpec`], [`IndexSpec`],
//!   [`SchemaRule`]) are the declarative description
//! - **Stores** ([`DocumentStore`], [`DatabaseHandle`]) are the seam to the
//!   engine, implemented for MongoDB ([`MongoStore`]) and in memory
//!   ([`MemoryStore`])
//! - **Provisioner** ([`Provisioner`]) is the apply loop; re-running it
//!   against a provisioned database is a no-op

mod error;
mod provision;
pub mod spec;
pub mod store;

pub use error::{ProvisionError, Result};

pub use provision::{
    CollectionOutcome, Drift, IndexOutcome, IndexReport, ProvisionOptions, ProvisionReport,
    Provisioner,
};

pub use spec::{
    CollectionSpec, DATABASE_NAME, EVENT_TTL, EVENTS_COLLECTION, EventType, IndexSpec,
    ProvisionSpec, SchemaRule, SortDirection, ValidationAction, ValidationLevel, event_schema,
};

pub use store::{DatabaseHandle, DocumentStore, MemoryStore, MongoSettings, MongoStore};

// Re-exported so callers build documents with the same BSON version
pub use mongodb::bson;
