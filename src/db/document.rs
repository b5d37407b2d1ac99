use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use super::{Backend, Collection};
use crate::errors::AppError;

pub struct DocumentBackend {
    root: PathBuf,
}

impl DocumentBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn collection_dir(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.as_str())
    }

    fn document_path(&self, collection: Collection, id: &str) -> Result<PathBuf, AppError> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(AppError::BadRequest(format!("Invalid document id '{}'", id)));
        }
        Ok(self.collection_dir(collection).join(format!("{}.json", id)))
    }
}

fn io_error(context: &str, err: std::io::Error) -> AppError {
    AppError::DatabaseError(format!("{}: {}", context, err))
}

#[async_trait]
impl Backend for DocumentBackend {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, AppError> {
        let dir = self.collection_dir(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error("Failed to list documents", err)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_error("Failed to list documents", err))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(&path)
                .await
                .map_err(|err| io_error("Failed to read document", err))?;
            match serde_json::from_slice(&bytes) {
                Ok(record) => records.push(record),
                Err(err) => log::warn!("Skipping undecodable document {}: {}", path.display(), err),
            }
        }
        Ok(records)
    }

    async fn upsert(&self, collection: Collection, id: &str, record: &Value) -> Result<(), AppError> {
        let path = self.document_path(collection, id)?;
        fs::create_dir_all(self.collection_dir(collection))
            .await
            .map_err(|err| io_error("Failed to create collection", err))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)
            .await
            .map_err(|err| io_error("Failed to write document", err))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|err| io_error("Failed to write document", err))?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), AppError> {
        let path = self.document_path(collection, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error("Failed to delete document", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stores_one_file_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DocumentBackend::new(dir.path());

        assert!(backend.get_all(Collection::Users).await.unwrap().is_empty());

        backend.upsert(Collection::Users, "u-1", &json!({"id": "u-1"})).await.unwrap();
        backend.upsert(Collection::Users, "u-2", &json!({"id": "u-2"})).await.unwrap();
        assert!(dir.path().join("users").join("u-1.json").exists());

        let users = backend.get_all(Collection::Users).await.unwrap();
        assert_eq!(users, vec![json!({"id": "u-1"}), json!({"id": "u-2"})]);

        backend.delete(Collection::Users, "u-1").await.unwrap();
        backend.delete(Collection::Users, "u-1").await.unwrap();
        assert_eq!(backend.get_all(Collection::Users).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn skips_undecodable_documents() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DocumentBackend::new(dir.path());
        backend.upsert(Collection::Users, "u-1", &json!({"id": "u-1"})).await.unwrap();
        std::fs::write(dir.path().join("users").join("broken.json"), "{not json").unwrap();

        let users = backend.get_all(Collection::Users).await.unwrap();
        assert_eq!(users, vec![json!({"id": "u-1"})]);
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DocumentBackend::new(dir.path());
        let result = backend.upsert(Collection::Units, "../escape", &json!({})).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
