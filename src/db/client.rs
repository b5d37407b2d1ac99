use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Backend, Collection, LocalCache};
use crate::errors::AppError;

/// Records of one collection, and whether they came from the local cache
/// because the backend could not be read.
#[derive(Debug)]
pub struct Fetched<T> {
    pub records: Vec<T>,
    pub from_cache: bool,
}

/// Write-through wrapper around a [`Backend`].
///
/// Every write lands in the local cache first. Backend failures are logged and
/// swallowed; reads fall back to the cache when the backend cannot answer.
pub struct PersistenceClient {
    backend: Arc<dyn Backend>,
    cache: LocalCache,
}

impl PersistenceClient {
    pub fn new(backend: Arc<dyn Backend>, cache: LocalCache) -> Self {
        Self { backend, cache }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get_all(&self, collection: Collection) -> Fetched<Value> {
        match self.backend.get_all(collection).await {
            Ok(records) => {
                self.cache.replace(collection, &records).await;
                Fetched {
                    records,
                    from_cache: false,
                }
            }
            Err(err) => {
                log::warn!(
                    "Reading {} from {} failed, serving local cache: {}",
                    collection,
                    self.backend.name(),
                    err
                );
                Fetched {
                    records: self.cache.get_all(collection).await,
                    from_cache: true,
                }
            }
        }
    }

    pub async fn load<T: DeserializeOwned>(&self, collection: Collection) -> Fetched<T> {
        let fetched = self.get_all(collection).await;
        let records = fetched
            .records
            .into_iter()
            .filter_map(|record| match serde_json::from_value(record) {
                Ok(item) => Some(item),
                Err(err) => {
                    log::warn!("Skipping malformed {} record: {}", collection, err);
                    None
                }
            })
            .collect();
        Fetched {
            records,
            from_cache: fetched.from_cache,
        }
    }

    pub async fn upsert<T: Serialize>(&self, collection: Collection, id: &str, record: &T) -> Result<(), AppError> {
        let value = serde_json::to_value(record)?;
        self.cache.put(collection, id, &value).await;
        if let Err(err) = self.backend.upsert(collection, id, &value).await {
            log::warn!(
                "Writing {}/{} to {} failed, kept in local cache: {}",
                collection,
                id,
                self.backend.name(),
                err
            );
        }
        Ok(())
    }

    pub async fn upsert_many<T: Serialize>(
        &self,
        collection: Collection,
        records: &[(String, T)],
    ) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }
        let values = records
            .iter()
            .map(|(id, record)| Ok((id.clone(), serde_json::to_value(record)?)))
            .collect::<Result<Vec<_>, AppError>>()?;

        self.cache.put_many(collection, &values).await;
        if let Err(err) = self.backend.upsert_many(collection, &values).await {
            log::warn!(
                "Bulk write of {} {} records to {} failed, kept in local cache: {}",
                values.len(),
                collection,
                self.backend.name(),
                err
            );
        }
        Ok(())
    }

    pub async fn delete(&self, collection: Collection, id: &str) {
        self.cache.remove(collection, id).await;
        if let Err(err) = self.backend.delete(collection, id).await {
            log::warn!(
                "Deleting {}/{} from {} failed: {}",
                collection,
                id,
                self.backend.name(),
                err
            );
        }
    }
}
