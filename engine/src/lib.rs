//! # Duplex Engine
//!
//! Dual-store replication and nested reconciliation for record-shaped data.
//!
//! Every entity lives in two structurally identical stores, Primary and
//! Secondary. Writes go to both inside a pair of transactions, with the
//! identity Primary generates forced onto the Secondary copy. Nested child
//! collections are brought in line with a client's desired state by a
//! diff-based reconciliation that recurses through any number of levels.
//!
//! ## Design Principles
//!
//! - **No IO of its own**: stores are reached through the [`Store`] and
//!   [`StoreTx`] traits; [`MemoryStore`] backs the tests
//! - **Primary decides identity**: Secondary never generates ids
//! - **Honest failure**: commits are sequential, and a Secondary failure
//!   after a Primary commit is reported as [`Error::PartialReplication`]
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! An [`EntityRecord`] is an optional `id` plus a JSON field map. A record
//! without an id is a create target; one with an id is an update target.
//!
//! ### Stores
//!
//! [`Stores`] binds the two store handles to one [`EntityRegistry`]. An
//! [`Accessor`] is the store-bound data access for one entity.
//!
//! ### Replicated writes
//!
//! [`ReplicatedService`] provides create, update, delete, bulk variants and
//! reads for one entity. Each write opens a [`ReplicationTx`] and commits
//! Primary, then Secondary.
//!
//! ### Reconciliation
//!
//! [`reconcile::sync_children`] makes the children of one parent match a
//! desired list: items without an id are created, items with an id are
//! updated, existing children that are not desired are deleted.
//! [`TreeSynchronizer`] applies this level by level through a [`TreeSpec`].
//!
//! ### Drift
//!
//! [`DriftDetector`] compares the two stores per entity and copies Primary
//! rows onto Secondary on request.
//!
//! ## Quick Start
//!
//! ```rust
//! use duplex_engine::{EntityRecord, EntityRegistry, MemoryStore, ReplicatedService, Stores};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! // 1. Register entities and bind both stores
//! let registry = EntityRegistry::new().with_entity("Category", "categories");
//! let primary = MemoryStore::new("primary");
//! let secondary = MemoryStore::new("secondary");
//! let stores = Stores::new(
//!     Arc::new(primary.clone()),
//!     Arc::new(secondary.clone()),
//!     registry,
//! );
//!
//! // 2. Write through both stores
//! let categories = ReplicatedService::new("Category", stores).unwrap();
//! let created = categories
//!     .create(EntityRecord::from(json!({"name": "Tools"})), true)
//!     .await
//!     .unwrap();
//!
//! // 3. Secondary holds the same row under the same id
//! let id = created.id.unwrap();
//! assert!(secondary.row("categories", id).unwrap().content_eq(&created));
//! # });
//! ```

pub mod drift;
pub mod error;
pub mod memory;
pub mod reconcile;
pub mod record;
pub mod registry;
pub mod service;
pub mod store;
pub mod transaction;
pub mod tree;

// Re-export main types at crate root
pub use drift::{DriftDetector, RepairSummary, SyncReport};
pub use error::{Error, Operation, Result};
pub use memory::{Fault, MemoryStore};
pub use reconcile::{ChildSyncResult, ParentScope, ReconciliationPlan, SyncSummary};
pub use record::{EntityRecord, ID_FIELD, TIMESTAMP_FIELDS};
pub use registry::{Accessor, AccessorPair, EntityDef, EntityRegistry, StoreHandle, Stores};
pub use service::{BulkResult, BulkSummary, CountedRows, ReplicatedService};
pub use store::{Condition, Filter, Page, Store, StoreError, StoreRole, StoreTx};
pub use transaction::ReplicationTx;
pub use tree::{
    DesiredNode, LevelOutcome, LevelSpec, NodeOperation, SyncedNode, TreeSpec, TreeSynchronizer,
};

/// Type aliases for clarity
pub type Id = i64;
pub type EntityName = String;
