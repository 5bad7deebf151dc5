//! Error types for shopdb provisioning

use thiserror::Error;

/// Errors that can occur while provisioning or talking to the store
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The store could not be reached (network, server selection, auth, timeout)
    #[error("connection error: {0}")]
    Connection(String),

    /// The collection is already present and strict mode forbids reusing it
    #[error("collection already exists: {database}.{collection}")]
    AlreadyExists {
        database: String,
        collection: String,
    },

    /// The schema rule or provisioning spec is malformed
    #[error("invalid validation spec: {0}")]
    ValidationSpec(String),

    /// An existing index is incompatible with the requested definition
    #[error("index conflict on {collection}.{name}: existing {existing}, requested {requested}")]
    IndexConflict {
        collection: String,
        name: String,
        existing: String,
        requested: String,
    },

    /// A document failed the collection validator
    #[error("document rejected by validator: {0}")]
    DocumentRejected(String),

    /// Any other store failure
    #[error("database error: {0}")]
    Database(String),
}

impl ProvisionError {
    /// True for failures caused by the store being unreachable
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
