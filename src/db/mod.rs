pub mod cache;
pub mod client;
pub mod document;
pub mod memory;
pub mod postgres;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Config, StoreBackendKind};
use crate::errors::AppError;

pub use cache::LocalCache;
pub use client::{Fetched, PersistenceClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Units,
    Users,
    Tasks,
    Kpis,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Units,
        Collection::Users,
        Collection::Tasks,
        Collection::Kpis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Units => "units",
            Collection::Users => "users",
            Collection::Tasks => "tasks",
            Collection::Kpis => "kpis",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/record store behind the entity arrays. Records are JSON documents keyed by id.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, AppError>;

    async fn upsert(&self, collection: Collection, id: &str, record: &Value) -> Result<(), AppError>;

    async fn upsert_many(
        &self,
        collection: Collection,
        records: &[(String, Value)],
    ) -> Result<(), AppError> {
        for (id, record) in records {
            self.upsert(collection, id, record).await?;
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), AppError>;
}

pub async fn create_backend(config: &Config) -> Result<Arc<dyn Backend>, AppError> {
    let backend: Arc<dyn Backend> = match config.backend {
        StoreBackendKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| AppError::InternalServerError("DATABASE_URL must be set".to_string()))?;
            Arc::new(postgres::PostgresBackend::connect(url).await?)
        }
        StoreBackendKind::Document => Arc::new(document::DocumentBackend::new(&config.document_dir)),
        StoreBackendKind::Memory => Arc::new(memory::MemoryBackend::new()),
    };
    log::info!("Using {} persistence backend", backend.name());
    Ok(backend)
}
