//! Persistence port for tags
//!
//! The core talks to its document store through the [`TagStore`] trait;
//! production deployments plug in the external JSONB store adapter, and the
//! in-memory implementation below backs tests and self-contained runs.
//! Store errors propagate unchanged to callers; bulk operations abort on the
//! first failure with no partial-commit contract.

use crate::domain::tag::Tag;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("invalid field update for {epc}: {reason}")]
    InvalidUpdate { epc: String, reason: String },
}

/// Row filter for retrieval and counting
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub facility_id: Option<String>,
    pub epc_state: Option<String>,
    /// Row cap, typically the configured response limit
    pub limit: Option<usize>,
}

impl TagFilter {
    fn matches(&self, tag: &Tag) -> bool {
        if let Some(ref facility) = self.facility_id {
            if &tag.facility_id != facility {
                return false;
            }
        }
        if let Some(ref state) = self.epc_state {
            if &tag.epc_state != state {
                return false;
            }
        }
        true
    }
}

/// Abstract tag document store, keyed by EPC
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn find_by_epc(&self, epc: &str) -> Result<Option<Tag>, StoreError>;

    /// Upsert-by-EPC, atomic per tag
    async fn replace(&self, tags: &[Tag]) -> Result<(), StoreError>;

    /// Partial update of named fields on one tag
    async fn update(
        &self,
        epc: &str,
        facility_id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, epc: &str) -> Result<(), StoreError>;

    async fn delete_all(&self) -> Result<(), StoreError>;

    async fn retrieve_all(&self, filter: &TagFilter) -> Result<Vec<Tag>, StoreError>;

    async fn count(&self, filter: &TagFilter) -> Result<usize, StoreError>;
}

/// In-memory tag store for tests and self-contained deployments
#[derive(Default)]
pub struct MemoryTagStore {
    tags: RwLock<FxHashMap<String, Tag>>,
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TagStore for MemoryTagStore {
    async fn find_by_epc(&self, epc: &str) -> Result<Option<Tag>, StoreError> {
        Ok(self.tags.read().get(epc).cloned())
    }

    async fn replace(&self, tags: &[Tag]) -> Result<(), StoreError> {
        let mut guard = self.tags.write();
        for tag in tags {
            if tag.epc.is_empty() {
                return Err(StoreError::Backend("tag with empty epc".to_string()));
            }
            guard.insert(tag.epc.clone(), tag.clone());
        }
        Ok(())
    }

    async fn update(
        &self,
        epc: &str,
        facility_id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut guard = self.tags.write();
        let Some(tag) = guard.get_mut(epc) else {
            return Err(StoreError::InvalidUpdate {
                epc: epc.to_string(),
                reason: "no such tag".to_string(),
            });
        };
        if tag.facility_id != facility_id {
            return Err(StoreError::InvalidUpdate {
                epc: epc.to_string(),
                reason: format!("facility mismatch: {}", tag.facility_id),
            });
        }

        let mut doc = serde_json::to_value(&*tag).map_err(|e| StoreError::Backend(e.to_string()))?;
        let Some(obj) = doc.as_object_mut() else {
            return Err(StoreError::Backend("tag did not serialize to object".to_string()));
        };
        for (key, value) in fields {
            obj.insert(key.clone(), value.clone());
        }
        *tag = serde_json::from_value(doc).map_err(|e| StoreError::InvalidUpdate {
            epc: epc.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn delete(&self, epc: &str) -> Result<(), StoreError> {
        self.tags.write().remove(epc);
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.tags.write().clear();
        Ok(())
    }

    async fn retrieve_all(&self, filter: &TagFilter) -> Result<Vec<Tag>, StoreError> {
        let guard = self.tags.read();
        let mut tags: Vec<Tag> = guard.values().filter(|t| filter.matches(t)).cloned().collect();
        tags.sort_by(|a, b| a.epc.cmp(&b.epc));
        if let Some(limit) = filter.limit {
            tags.truncate(limit);
        }
        Ok(tags)
    }

    async fn count(&self, filter: &TagFilter) -> Result<usize, StoreError> {
        Ok(self.tags.read().values().filter(|t| filter.matches(t)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tag::EPC_STATE_PRESENT;

    fn tag(epc: &str, facility: &str) -> Tag {
        let mut t = Tag::new(epc);
        t.facility_id = facility.to_string();
        t.epc_state = EPC_STATE_PRESENT.to_string();
        t
    }

    #[tokio::test]
    async fn test_replace_then_find_round_trips() {
        let store = MemoryTagStore::new();
        let original = tag("301400000000000000000001", "salesFloor");
        store.replace(std::slice::from_ref(&original)).await.unwrap();

        let found = store.find_by_epc("301400000000000000000001").await.unwrap().unwrap();
        assert!(found.is_equal(&original));
        assert!(store.find_by_epc("301400000000000000000002").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_merges_by_epc() {
        let store = MemoryTagStore::new();
        store.replace(&[tag("e1", "salesFloor")]).await.unwrap();
        store.replace(&[tag("e1", "backStock")]).await.unwrap();

        assert_eq!(store.count(&TagFilter::default()).await.unwrap(), 1);
        let found = store.find_by_epc("e1").await.unwrap().unwrap();
        assert_eq!(found.facility_id, "backStock");
    }

    #[tokio::test]
    async fn test_update_partial_fields() {
        let store = MemoryTagStore::new();
        store.replace(&[tag("e1", "salesFloor")]).await.unwrap();

        let mut fields = serde_json::Map::new();
        fields.insert("qualified_state".to_string(), serde_json::json!("sold"));
        store.update("e1", "salesFloor", &fields).await.unwrap();

        let found = store.find_by_epc("e1").await.unwrap().unwrap();
        assert_eq!(found.qualified_state, "sold");
        assert_eq!(found.epc_state, EPC_STATE_PRESENT);

        // wrong facility is rejected
        let err = store.update("e1", "backStock", &fields).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate { .. }));
    }

    #[tokio::test]
    async fn test_retrieve_all_filters_and_limits() {
        let store = MemoryTagStore::new();
        store
            .replace(&[
                tag("e1", "salesFloor"),
                tag("e2", "salesFloor"),
                tag("e3", "backStock"),
            ])
            .await
            .unwrap();

        let filter = TagFilter {
            facility_id: Some("salesFloor".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count(&filter).await.unwrap(), 2);

        let limited = TagFilter { limit: Some(1), ..filter };
        let rows = store.retrieve_all(&limited).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].epc, "e1");
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let store = MemoryTagStore::new();
        store.replace(&[tag("e1", "salesFloor"), tag("e2", "salesFloor")]).await.unwrap();

        store.delete("e1").await.unwrap();
        assert_eq!(store.count(&TagFilter::default()).await.unwrap(), 1);

        store.delete_all().await.unwrap();
        assert_eq!(store.count(&TagFilter::default()).await.unwrap(), 0);
    }
}
