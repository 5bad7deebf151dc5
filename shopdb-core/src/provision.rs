//! The provisioning apply loop
//!
//! [`Provisioner::provision`] brings a database in line with a
//! [`ProvisionSpec`]: the collection is created with its validator if absent,
//! then every planned index is checked against the live catalog and created
//! only when missing. Running it again against a provisioned database changes
//! nothing. Nothing is rolled back on failure; a re-run converges.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::{ProvisionError, Result};
use crate::spec::{CollectionSpec, IndexSpec, ProvisionSpec};
use crate::store::{DatabaseHandle, DocumentStore};

/// Knobs for a provisioning run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionOptions {
    /// Fail with `AlreadyExists` instead of reusing an existing collection
    pub strict: bool,
    /// Inspect and report, but create nothing
    pub dry_run: bool,
}

/// What happened to the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionOutcome {
    Created,
    /// Present before the run; its validator was left as is
    AlreadyExisted,
    /// Would be created (dry run)
    Planned,
}

/// What happened to one planned index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexOutcome {
    Created,
    AlreadyPresent,
    /// An identical index exists under another name
    PresentAs { name: String },
    /// Would be created (dry run)
    Planned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub name: String,
    pub outcome: IndexOutcome,
}

/// Result of a provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub database: String,
    pub collection: String,
    pub collection_outcome: CollectionOutcome,
    pub indexes: Vec<IndexReport>,
    pub dry_run: bool,
}

impl ProvisionReport {
    /// Number of structures created by this run
    pub fn created_count(&self) -> usize {
        let collection = usize::from(self.collection_outcome == CollectionOutcome::Created);
        collection
            + self
                .indexes
                .iter()
                .filter(|i| i.outcome == IndexOutcome::Created)
                .count()
    }

    /// True when the run found everything in place
    pub fn is_noop(&self) -> bool {
        self.collection_outcome == CollectionOutcome::AlreadyExisted
            && self.indexes.iter().all(|i| {
                matches!(
                    i.outcome,
                    IndexOutcome::AlreadyPresent | IndexOutcome::PresentAs { .. }
                )
            })
    }
}

impl fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collection = match self.collection_outcome {
            CollectionOutcome::Created => "created",
            CollectionOutcome::AlreadyExisted => "already exists",
            CollectionOutcome::Planned => "would be created",
        };
        writeln!(
            f,
            "Collection {}.{}: {}",
            self.database, self.collection, collection
        )?;
        for index in &self.indexes {
            match &index.outcome {
                IndexOutcome::Created => writeln!(f, "  index {}: created", index.name)?,
                IndexOutcome::AlreadyPresent => {
                    writeln!(f, "  index {}: already present", index.name)?
                }
                IndexOutcome::PresentAs { name } => {
                    writeln!(f, "  index {}: present as {}", index.name, name)?
                }
                IndexOutcome::Planned => {
                    writeln!(f, "  index {}: would be created", index.name)?
                }
            }
        }
        if self.dry_run {
            write!(f, "Dry run: nothing was changed")
        } else if self.is_noop() {
            write!(f, "Already provisioned: nothing to do")
        } else {
            write!(f, "Created {} structure(s)", self.created_count())
        }
    }
}

/// One difference between the live database and the provisioning plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Drift {
    MissingCollection {
        collection: String,
    },
    MissingIndex {
        name: String,
        expected: String,
    },
    ChangedIndex {
        name: String,
        existing: String,
        expected: String,
    },
    UnexpectedIndex {
        name: String,
        existing: String,
    },
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCollection { collection } => {
                write!(f, "collection {collection} is missing")
            }
            Self::MissingIndex { name, expected } => {
                write!(f, "index {name} is missing (expected {expected})")
            }
            Self::ChangedIndex {
                name,
                existing,
                expected,
            } => write!(f, "index {name} is {existing}, expected {expected}"),
            Self::UnexpectedIndex { name, existing } => {
                write!(f, "index {name} ({existing}) is not in the plan")
            }
        }
    }
}

/// Applies a [`ProvisionSpec`] to a store
#[derive(Debug, Clone, Default)]
pub struct Provisioner {
    options: ProvisionOptions,
}

impl Provisioner {
    pub fn new(options: ProvisionOptions) -> Self {
        Self { options }
    }

    /// Ensure the collection, its validator and every planned index exist
    #[instrument(
        skip_all,
        fields(database = %spec.database, collection = %spec.collection.name)
    )]
    pub async fn provision(
        &self,
        store: &dyn DocumentStore,
        spec: &ProvisionSpec,
    ) -> Result<ProvisionReport> {
        spec.validate()?;
        store.ping().await?;

        let db = store.database(&spec.database);
        let collection_outcome = self.ensure_collection(db.as_ref(), &spec.collection).await?;

        // One catalog read; entries created below are not re-read
        let existing = db.list_indexes(&spec.collection.name).await?;

        let mut indexes = Vec::with_capacity(spec.indexes.len());
        for index in &spec.indexes {
            let outcome = self
                .ensure_index(db.as_ref(), &spec.collection.name, index, &existing)
                .await?;
            indexes.push(IndexReport {
                name: index.name.clone(),
                outcome,
            });
        }

        let report = ProvisionReport {
            database: spec.database.clone(),
            collection: spec.collection.name.clone(),
            collection_outcome,
            indexes,
            dry_run: self.options.dry_run,
        };
        info!(
            created = report.created_count(),
            dry_run = self.options.dry_run,
            "provisioning complete"
        );
        Ok(report)
    }

    async fn ensure_collection(
        &self,
        db: &dyn DatabaseHandle,
        spec: &CollectionSpec,
    ) -> Result<CollectionOutcome> {
        if db.collection_exists(&spec.name).await? {
            return self.existing_collection(db, spec);
        }
        if self.options.dry_run {
            return Ok(CollectionOutcome::Planned);
        }

        match db.create_collection(spec).await {
            Ok(()) => {
                info!(
                    collection = %spec.name,
                    action = ?spec.validation_action,
                    level = ?spec.validation_level,
                    "created collection with validator"
                );
                Ok(CollectionOutcome::Created)
            }
            // Lost a race with another creator
            Err(ProvisionError::AlreadyExists { .. }) => self.existing_collection(db, spec),
            Err(err) => Err(err),
        }
    }

    fn existing_collection(
        &self,
        db: &dyn DatabaseHandle,
        spec: &CollectionSpec,
    ) -> Result<CollectionOutcome> {
        if self.options.strict {
            return Err(ProvisionError::AlreadyExists {
                database: db.name().to_string(),
                collection: spec.name.clone(),
            });
        }
        debug!(collection = %spec.name, "collection exists, validator left untouched");
        Ok(CollectionOutcome::AlreadyExisted)
    }

    async fn ensure_index(
        &self,
        db: &dyn DatabaseHandle,
        collection: &str,
        index: &IndexSpec,
        existing: &[IndexSpec],
    ) -> Result<IndexOutcome> {
        if let Some(current) = existing.iter().find(|i| i.name == index.name) {
            if current.same_definition(index) {
                debug!(index = %index.name, "index already present");
                return Ok(IndexOutcome::AlreadyPresent);
            }
            return Err(ProvisionError::IndexConflict {
                collection: collection.to_string(),
                name: index.name.clone(),
                existing: current.to_string(),
                requested: index.to_string(),
            });
        }

        if let Some(current) = existing.iter().find(|i| i.same_definition(index)) {
            debug!(index = %index.name, present_as = %current.name, "identical index under another name");
            return Ok(IndexOutcome::PresentAs {
                name: current.name.clone(),
            });
        }

        if self.options.dry_run {
            return Ok(IndexOutcome::Planned);
        }

        db.create_index(collection, index).await?;
        info!(index = %index.name, definition = %index, "created index");
        Ok(IndexOutcome::Created)
    }

    /// Compare the live database against `spec` without changing anything
    #[instrument(
        skip_all,
        fields(database = %spec.database, collection = %spec.collection.name)
    )]
    pub async fn verify(
        &self,
        store: &dyn DocumentStore,
        spec: &ProvisionSpec,
    ) -> Result<Vec<Drift>> {
        spec.validate()?;
        store.ping().await?;

        let db = store.database(&spec.database);
        if !db.collection_exists(&spec.collection.name).await? {
            return Ok(vec![Drift::MissingCollection {
                collection: spec.collection.name.clone(),
            }]);
        }

        let existing = db.list_indexes(&spec.collection.name).await?;
        let mut matched: Vec<&str> = Vec::new();
        let mut drift = Vec::new();

        for index in &spec.indexes {
            if let Some(current) = existing.iter().find(|i| i.name == index.name) {
                matched.push(&current.name);
                if !current.same_definition(index) {
                    drift.push(Drift::ChangedIndex {
                        name: index.name.clone(),
                        existing: current.to_string(),
                        expected: index.to_string(),
                    });
                }
            } else if let Some(current) = existing.iter().find(|i| i.same_definition(index)) {
                matched.push(&current.name);
            } else {
                drift.push(Drift::MissingIndex {
                    name: index.name.clone(),
                    expected: index.to_string(),
                });
            }
        }

        for current in &existing {
            if !matched.contains(&current.name.as_str()) {
                drift.push(Drift::UnexpectedIndex {
                    name: current.name.clone(),
                    existing: current.to_string(),
                });
            }
        }

        debug!(drift = drift.len(), "verification complete");
        Ok(drift)
    }
}
