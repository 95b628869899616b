//! SQLite-backed document store

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use super::DbPool;
use crate::domain::repositories::document_store::{
    apply_order_and_limit, matches_filters, DocumentStore, Filter, OrderBy, StoreError,
    StoreResult,
};

/// Document store over a single SQLite `documents` table. Filters and
/// ordering are evaluated over the decoded JSON bodies so that the
/// semantics stay identical to the in-memory store.
pub struct SqliteDocumentStore {
    pool: DbPool,
}

impl SqliteDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn backend_error(e: sqlx::Error) -> StoreError {
        StoreError::Backend(e.to_string())
    }

    fn decode_body(body: &str) -> StoreResult<Value> {
        serde_json::from_str(body).map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::backend_error)?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(Self::decode_body(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<OrderBy>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>> {
        let rows = sqlx::query("SELECT body FROM documents WHERE collection = ?1 ORDER BY id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::backend_error)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.get("body");
            let doc = Self::decode_body(&body)?;
            if matches_filters(&doc, filters) {
                docs.push(doc);
            }
        }

        apply_order_and_limit(&mut docs, order.as_ref(), limit);
        Ok(docs)
    }

    async fn put(&self, collection: &str, id: &str, mut doc: Value) -> StoreResult<()> {
        let now = Utc::now();
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
        }
        let body =
            serde_json::to_string(&doc).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (collection, id)
            DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(body)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Self::backend_error)?;

        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()> {
        let existing = self
            .get(collection, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        let mut merged = existing;
        match (merged.as_object_mut(), fields.as_object()) {
            (Some(target), Some(updates)) => {
                for (key, value) in updates {
                    target.insert(key.clone(), value.clone());
                }
            }
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "update on {}/{} requires object documents",
                    collection, id
                )))
            }
        }

        self.put(collection, id, merged).await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::backend_error)?;
        Ok(())
    }
}
