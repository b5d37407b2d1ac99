use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;

use super::Collection;

type Snapshot = BTreeMap<String, BTreeMap<String, Value>>;

/// Last-known copy of every collection, optionally mirrored to a JSON file.
///
/// Serves reads when the backend is unreachable. Snapshot writes are best effort.
#[derive(Default)]
pub struct LocalCache {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
    snapshot_path: Option<PathBuf>,
}

impl LocalCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub async fn open(path: PathBuf) -> Self {
        let mut collections = HashMap::new();
        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => {
                    for collection in Collection::ALL {
                        if let Some(records) = snapshot.get(collection.as_str()) {
                            collections.insert(collection, records.clone());
                        }
                    }
                }
                Err(err) => log::warn!("Ignoring unreadable cache snapshot {}: {}", path.display(), err),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("Failed to read cache snapshot {}: {}", path.display(), err),
        }

        Self {
            collections: RwLock::new(collections),
            snapshot_path: Some(path),
        }
    }

    pub async fn get_all(&self, collection: Collection) -> Vec<Value> {
        let collections = self.collections.read().await;
        collections
            .get(&collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Replaces a whole collection with a fresh backend read. Records without an `id` are dropped.
    pub async fn replace(&self, collection: Collection, records: &[Value]) {
        let fresh: BTreeMap<String, Value> = records
            .iter()
            .filter_map(|record| {
                record
                    .get("id")
                    .and_then(Value::as_str)
                    .map(|id| (id.to_string(), record.clone()))
            })
            .collect();
        self.collections.write().await.insert(collection, fresh);
        self.flush().await;
    }

    pub async fn put(&self, collection: Collection, id: &str, record: &Value) {
        self.collections
            .write()
            .await
            .entry(collection)
            .or_default()
            .insert(id.to_string(), record.clone());
        self.flush().await;
    }

    pub async fn put_many(&self, collection: Collection, records: &[(String, Value)]) {
        {
            let mut collections = self.collections.write().await;
            let target = collections.entry(collection).or_default();
            for (id, record) in records {
                target.insert(id.clone(), record.clone());
            }
        }
        self.flush().await;
    }

    pub async fn remove(&self, collection: Collection, id: &str) {
        if let Some(records) = self.collections.write().await.get_mut(&collection) {
            records.remove(id);
        }
        self.flush().await;
    }

    async fn flush(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };

        let snapshot: Snapshot = {
            let collections = self.collections.read().await;
            collections
                .iter()
                .map(|(collection, records)| (collection.as_str().to_string(), records.clone()))
                .collect()
        };

        let bytes = match serde_json::to_vec(&snapshot) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("Failed to serialize cache snapshot: {}", err);
                return;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent).await {
                log::warn!("Failed to create cache directory {}: {}", parent.display(), err);
                return;
            }
        }
        if let Err(err) = fs::write(path, bytes).await {
            log::warn!("Failed to write cache snapshot {}: {}", path.display(), err);
        }
    }
}
