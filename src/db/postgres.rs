use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;

use super::{Backend, Collection};
use crate::errors::AppError;

/// Relational adapter: one `(id, data JSONB, updated_at)` table per collection.
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPool::connect(database_url).await?;
        let backend = Self::from_pool(pool);
        backend.ensure_schema().await?;
        Ok(backend)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        for collection in Collection::ALL {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    data JSONB NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )",
                collection.as_str()
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn upsert_sql(collection: Collection) -> String {
        format!(
            "INSERT INTO {} (id, data, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at",
            collection.as_str()
        )
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, AppError> {
        let sql = format!("SELECT data FROM {} ORDER BY id", collection.as_str());
        let rows = sqlx::query_scalar::<_, Json<Value>>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|Json(value)| value).collect())
    }

    async fn upsert(&self, collection: Collection, id: &str, record: &Value) -> Result<(), AppError> {
        sqlx::query(&Self::upsert_sql(collection))
            .bind(id)
            .bind(Json(record))
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_many(
        &self,
        collection: Collection,
        records: &[(String, Value)],
    ) -> Result<(), AppError> {
        let sql = Self::upsert_sql(collection);
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for (id, record) in records {
            sqlx::query(&sql)
                .bind(id)
                .bind(Json(record))
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), AppError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", collection.as_str());
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}
