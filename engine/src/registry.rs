//! Store handles and the entity registry.
//!
//! Both stores share one [`EntityRegistry`], so an entity always resolves to
//! the same table shape on either side. Services receive a [`Stores`] value
//! at construction instead of reaching for a global.

use crate::error::{Error, Result};
use crate::store::{Filter, Page, Store, StoreError, StoreRole, StoreTx};
use crate::{EntityName, EntityRecord};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Definition of one logical entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    pub name: EntityName,
    pub table: String,
}

impl EntityDef {
    pub fn new(name: impl Into<EntityName>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
        }
    }
}

/// Maps entity names to their table definitions.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<EntityName, EntityDef>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity, returning the registry for chaining.
    pub fn with_entity(mut self, name: impl Into<EntityName>, table: impl Into<String>) -> Self {
        self.register(EntityDef::new(name, table));
        self
    }

    pub fn register(&mut self, def: EntityDef) {
        self.entities.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Result<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &EntityName> {
        self.entities.keys()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Convert a backend error into an engine error tagged with its store.
pub(crate) fn tag(store: StoreRole) -> impl Fn(StoreError) -> Error {
    move |err| match err {
        StoreError::Constraint(message) => Error::Validation { store, message },
        StoreError::Backend(message) => Error::Store { store, message },
    }
}

/// One physical store plus the entity registry.
#[derive(Clone)]
pub struct StoreHandle {
    role: StoreRole,
    store: Arc<dyn Store>,
    registry: Arc<EntityRegistry>,
}

impl StoreHandle {
    pub fn new(role: StoreRole, store: Arc<dyn Store>, registry: Arc<EntityRegistry>) -> Self {
        Self {
            role,
            store,
            registry,
        }
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Resolve the store-bound accessor for an entity.
    pub fn accessor_for(&self, entity: &str) -> Result<Accessor> {
        let def = self.registry.get(entity)?;
        Ok(Accessor {
            role: self.role,
            entity: def.name.clone(),
            table: def.table.clone(),
            store: Arc::clone(&self.store),
        })
    }

    pub async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        self.store.begin().await.map_err(tag(self.role))
    }
}

/// The two store handles of the system.
#[derive(Clone)]
pub struct Stores {
    primary: StoreHandle,
    secondary: StoreHandle,
}

impl Stores {
    /// Bind two stores to one registry.
    pub fn new(
        primary: Arc<dyn Store>,
        secondary: Arc<dyn Store>,
        registry: EntityRegistry,
    ) -> Self {
        let registry = Arc::new(registry);
        Self {
            primary: StoreHandle::new(StoreRole::Primary, primary, Arc::clone(&registry)),
            secondary: StoreHandle::new(StoreRole::Secondary, secondary, registry),
        }
    }

    pub fn handle(&self, role: StoreRole) -> &StoreHandle {
        match role {
            StoreRole::Primary => &self.primary,
            StoreRole::Secondary => &self.secondary,
        }
    }

    pub fn primary(&self) -> &StoreHandle {
        &self.primary
    }

    pub fn secondary(&self) -> &StoreHandle {
        &self.secondary
    }

    pub fn registry(&self) -> &EntityRegistry {
        self.primary.registry()
    }

    pub fn accessor_for(&self, entity: &str, role: StoreRole) -> Result<Accessor> {
        self.handle(role).accessor_for(entity)
    }

    /// Resolve both accessors of an entity.
    pub fn pair(&self, entity: &str) -> Result<AccessorPair> {
        Ok(AccessorPair {
            primary: self.primary.accessor_for(entity)?,
            secondary: self.secondary.accessor_for(entity)?,
        })
    }
}

/// Store-bound data access for one entity.
///
/// Transactional methods take the transaction of the accessor's own store;
/// errors come back tagged with that store's role.
#[derive(Clone)]
pub struct Accessor {
    role: StoreRole,
    entity: EntityName,
    table: String,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor")
            .field("role", &self.role)
            .field("entity", &self.entity)
            .field("table", &self.table)
            .field("store", &self.store.name())
            .finish()
    }
}

impl Accessor {
    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn create(
        &self,
        tx: &mut dyn StoreTx,
        record: &EntityRecord,
    ) -> Result<EntityRecord> {
        tx.insert(&self.table, record).await.map_err(tag(self.role))
    }

    pub async fn bulk_create(
        &self,
        tx: &mut dyn StoreTx,
        records: &[EntityRecord],
    ) -> Result<Vec<EntityRecord>> {
        tx.insert_many(&self.table, records)
            .await
            .map_err(tag(self.role))
    }

    pub async fn update(
        &self,
        tx: &mut dyn StoreTx,
        filter: &Filter,
        fields: &Map<String, Value>,
    ) -> Result<u64> {
        tx.update(&self.table, filter, fields)
            .await
            .map_err(tag(self.role))
    }

    pub async fn delete(&self, tx: &mut dyn StoreTx, filter: &Filter) -> Result<u64> {
        tx.delete(&self.table, filter).await.map_err(tag(self.role))
    }

    pub async fn find_in(
        &self,
        tx: &mut dyn StoreTx,
        filter: &Filter,
    ) -> Result<Vec<EntityRecord>> {
        tx.select(&self.table, filter).await.map_err(tag(self.role))
    }

    pub async fn find_by_id_in(
        &self,
        tx: &mut dyn StoreTx,
        id: crate::Id,
    ) -> Result<Option<EntityRecord>> {
        Ok(self.find_in(tx, &Filter::by_id(id)).await?.into_iter().next())
    }

    /// Read without a transaction.
    pub async fn find(&self, filter: &Filter, page: Page) -> Result<Vec<EntityRecord>> {
        self.store
            .select(&self.table, filter, page)
            .await
            .map_err(tag(self.role))
    }

    pub async fn count(&self, filter: &Filter) -> Result<u64> {
        self.store
            .count(&self.table, filter)
            .await
            .map_err(tag(self.role))
    }
}

/// The Primary and Secondary accessors of one entity.
#[derive(Debug, Clone)]
pub struct AccessorPair {
    pub primary: Accessor,
    pub secondary: Accessor,
}

impl AccessorPair {
    pub fn entity(&self) -> &str {
        self.primary.entity()
    }

    /// Pick the accessor used for single-store reads.
    pub fn for_read(&self, dual: bool) -> &Accessor {
        if dual {
            &self.primary
        } else {
            &self.secondary
        }
    }
}
