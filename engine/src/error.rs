//! Error types for the Duplex engine.

use crate::{EntityName, Id, StoreRole};
use std::fmt;
use thiserror::Error;

/// The logical operation an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    BulkCreate,
    BulkCreateOrUpdate,
    Read,
    SyncChildren,
    SyncTree,
    DeleteTree,
    Repair,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::BulkCreate => "bulk create",
            Operation::BulkCreateOrUpdate => "bulk create/update",
            Operation::Read => "read",
            Operation::SyncChildren => "sync children",
            Operation::SyncTree => "sync tree",
            Operation::DeleteTree => "delete tree",
            Operation::Repair => "repair",
        };
        f.write_str(name)
    }
}

/// All possible errors from the Duplex engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityName),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: EntityName, id: Id },

    /// The store rejected a write (uniqueness, foreign key, type constraint).
    #[error("{store} store rejected write: {message}")]
    Validation { store: StoreRole, message: String },

    #[error("{store} store error: {message}")]
    Store { store: StoreRole, message: String },

    /// One store committed before the other failed. Not remediated.
    #[error(
        "partial replication of {entity}: {committed} committed but {failed} failed: {message}"
    )]
    PartialReplication {
        entity: EntityName,
        committed: StoreRole,
        failed: StoreRole,
        message: String,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("item {index} of '{collection}' could not be mapped to a stored record")]
    UnresolvedMapping { collection: String, index: usize },

    #[error("failed to {operation} {entity}: {source}")]
    Failed {
        entity: EntityName,
        operation: Operation,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with entity and operation context.
    ///
    /// Already-wrapped errors are left as they are so nested helpers don't
    /// stack the same context twice.
    pub fn context(self, entity: impl Into<EntityName>, operation: Operation) -> Self {
        match self {
            Error::Failed { .. } => self,
            other => Error::Failed {
                entity: entity.into(),
                operation,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with all context wrappers removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Failed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
