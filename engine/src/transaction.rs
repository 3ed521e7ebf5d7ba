//! Paired transactions across the two stores.
//!
//! Commits are sequential: Primary first, then Secondary. There is no
//! coordinator, so a Secondary commit failure after a successful Primary
//! commit leaves the stores divergent and is reported as
//! [`Error::PartialReplication`].

use crate::error::{Error, Operation, Result};
use crate::registry::{tag, Stores};
use crate::store::{StoreRole, StoreTx};

/// One transaction per targeted store, opened together for one logical
/// operation.
pub struct ReplicationTx {
    primary: Box<dyn StoreTx>,
    secondary: Option<Box<dyn StoreTx>>,
}

impl ReplicationTx {
    /// Open a transaction on Primary, and on Secondary when `dual` is set.
    pub async fn begin(stores: &Stores, dual: bool) -> Result<Self> {
        let primary = stores.primary().begin().await?;
        let secondary = if dual {
            match stores.secondary().begin().await {
                Ok(tx) => Some(tx),
                Err(e) => {
                    if let Err(rb) = primary.rollback().await {
                        tracing::error!("Rollback of primary transaction failed: {}", rb);
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };
        Ok(Self { primary, secondary })
    }

    /// Whether this pair writes through both stores.
    pub fn is_dual(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn primary(&mut self) -> &mut dyn StoreTx {
        self.primary.as_mut()
    }

    pub fn secondary(&mut self) -> Option<&mut dyn StoreTx> {
        match self.secondary.as_mut() {
            Some(tx) => Some(tx.as_mut()),
            None => None,
        }
    }

    /// Commit Primary, then Secondary.
    pub async fn commit(self, entity: &str) -> Result<()> {
        let Self { primary, secondary } = self;

        if let Err(e) = primary.commit().await {
            if let Some(secondary) = secondary {
                if let Err(rb) = secondary.rollback().await {
                    tracing::error!("Rollback of secondary transaction failed: {}", rb);
                }
            }
            return Err(tag(StoreRole::Primary)(e));
        }

        if let Some(secondary) = secondary {
            if let Err(e) = secondary.commit().await {
                tracing::error!(
                    "Partial replication of {}: primary committed, secondary commit failed: {}",
                    entity,
                    e
                );
                return Err(Error::PartialReplication {
                    entity: entity.to_string(),
                    committed: StoreRole::Primary,
                    failed: StoreRole::Secondary,
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Roll back every open transaction. Each rollback is attempted
    /// independently; failures are logged, not returned.
    pub async fn rollback(self) {
        let Self { primary, secondary } = self;
        match primary.rollback().await {
            Ok(()) => tracing::warn!("Rolled back primary transaction"),
            Err(e) => tracing::error!("Rollback of primary transaction failed: {}", e),
        }
        if let Some(secondary) = secondary {
            match secondary.rollback().await {
                Ok(()) => tracing::warn!("Rolled back secondary transaction"),
                Err(e) => tracing::error!("Rollback of secondary transaction failed: {}", e),
            }
        }
    }

    /// Commit on success, roll back on failure, and tag any error with the
    /// entity and operation.
    pub async fn finish<T>(
        self,
        entity: &str,
        operation: Operation,
        outcome: Result<T>,
    ) -> Result<T> {
        match outcome {
            Ok(value) => match self.commit(entity).await {
                Ok(()) => Ok(value),
                Err(e) => Err(e.context(entity, operation)),
            },
            Err(e) => {
                tracing::warn!("Failed to {} {}: {}", operation, entity, e);
                self.rollback().await;
                Err(e.context(entity, operation))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Fault;
    use crate::{EntityRecord, EntityRegistry, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Stores, MemoryStore, MemoryStore) {
        let a = MemoryStore::new("a");
        let b = MemoryStore::new("b");
        let stores = Stores::new(
            Arc::new(a.clone()),
            Arc::new(b.clone()),
            EntityRegistry::new().with_entity("Category", "categories"),
        );
        (stores, a, b)
    }

    #[tokio::test]
    async fn single_mode_has_no_secondary() {
        let (stores, _, _) = setup();
        let mut tx = ReplicationTx::begin(&stores, false).await.unwrap();
        assert!(!tx.is_dual());
        assert!(tx.secondary().is_none());
        tx.rollback().await;
    }

    #[tokio::test]
    async fn secondary_commit_failure_is_partial_replication() {
        let (stores, a, b) = setup();
        b.inject(Fault::Commit);

        let mut tx = ReplicationTx::begin(&stores, true).await.unwrap();
        let record = EntityRecord::from(json!({"name": "x"}));
        tx.primary().insert("categories", &record).await.unwrap();
        tx.secondary()
            .unwrap()
            .insert("categories", &record)
            .await
            .unwrap();

        let err = tx.commit("Category").await.unwrap_err();
        assert!(matches!(
            err,
            Error::PartialReplication {
                committed: StoreRole::Primary,
                failed: StoreRole::Secondary,
                ..
            }
        ));
        assert_eq!(a.rows("categories").len(), 1);
        assert!(b.rows("categories").is_empty());
    }

    #[tokio::test]
    async fn primary_commit_failure_leaves_both_untouched() {
        let (stores, a, b) = setup();
        a.inject(Fault::Commit);

        let mut tx = ReplicationTx::begin(&stores, true).await.unwrap();
        let record = EntityRecord::from(json!({"name": "x"}));
        tx.primary().insert("categories", &record).await.unwrap();
        tx.secondary()
            .unwrap()
            .insert("categories", &record)
            .await
            .unwrap();

        let err = tx.commit("Category").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Store {
                store: StoreRole::Primary,
                ..
            }
        ));
        assert!(a.rows("categories").is_empty());
        assert!(b.rows("categories").is_empty());
    }

    #[tokio::test]
    async fn secondary_begin_failure_is_reported() {
        let (stores, _, b) = setup();
        b.inject(Fault::Begin);
        let err = ReplicationTx::begin(&stores, true).await.err().unwrap();
        assert!(matches!(
            err,
            Error::Store {
                store: StoreRole::Secondary,
                ..
            }
        ));
    }
}
