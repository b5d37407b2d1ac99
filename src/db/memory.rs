use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Backend, Collection};
use crate::errors::AppError;

#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, AppError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(&self, collection: Collection, id: &str, record: &Value) -> Result<(), AppError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection)
            .or_default()
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn upsert_many(
        &self,
        collection: Collection,
        records: &[(String, Value)],
    ) -> Result<(), AppError> {
        let mut collections = self.collections.write().await;
        let target = collections.entry(collection).or_default();
        for (id, record) in records {
            target.insert(id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), AppError> {
        let mut collections = self.collections.write().await;
        if let Some(records) = collections.get_mut(&collection) {
            records.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_replaces_and_delete_removes() {
        let backend = MemoryBackend::new();
        backend.upsert(Collection::Units, "DV1", &json!({"name": "a"})).await.unwrap();
        backend.upsert(Collection::Units, "DV1", &json!({"name": "b"})).await.unwrap();
        backend.upsert(Collection::Users, "u1", &json!({"name": "c"})).await.unwrap();

        let units = backend.get_all(Collection::Units).await.unwrap();
        assert_eq!(units, vec![json!({"name": "b"})]);

        backend.delete(Collection::Units, "DV1").await.unwrap();
        assert!(backend.get_all(Collection::Units).await.unwrap().is_empty());
        assert_eq!(backend.get_all(Collection::Users).await.unwrap().len(), 1);
    }
}
