//! In-memory document store
//!
//! Backs the test suites and mirrors the SQLite store's semantics exactly,
//! including the `updated_at` stamp, so either backend can sit behind the
//! engine.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::domain::repositories::document_store::{
    apply_order_and_limit, matches_filters, DocumentStore, Filter, OrderBy, StoreError,
    StoreResult,
};

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(mut doc: Value) -> Value {
        if let Some(obj) = doc.as_object_mut() {
            obj.insert(
                "updated_at".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        doc
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<OrderBy>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let mut docs: Vec<Value> = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| matches_filters(doc, filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        apply_order_and_limit(&mut docs, order.as_ref(), limit);
        Ok(docs)
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), Self::stamp(doc));
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let doc = docs.get_mut(id).ok_or_else(|| StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;

        match (doc.as_object_mut(), fields.as_object()) {
            (Some(target), Some(updates)) => {
                for (key, value) in updates {
                    target.insert(key.clone(), value.clone());
                }
                target.insert(
                    "updated_at".to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                Ok(())
            }
            _ => Err(StoreError::Corrupt(format!(
                "update on {}/{} requires object documents",
                collection, id
            ))),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put("users", "u1", json!({ "balance": 5.0 })).await.unwrap();

        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc["balance"], 5.0);
        assert!(doc.get("updated_at").is_some());

        store.delete("users", "u1").await.unwrap();
        assert!(store.get("users", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_and_missing_is_not_found() {
        let store = MemoryStore::new();
        store
            .put("users", "u1", json!({ "balance": 5.0, "name": "a" }))
            .await
            .unwrap();

        store
            .update("users", "u1", json!({ "balance": 6.0 }))
            .await
            .unwrap();
        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc["balance"], 6.0);
        assert_eq!(doc["name"], "a");

        let err = store
            .update("users", "ghost", json!({ "balance": 1.0 }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_matches_sqlite_semantics() {
        let store = MemoryStore::new();
        for (id, user, ts) in [
            ("t1", "u1", "2024-01-01"),
            ("t2", "u2", "2024-02-01"),
            ("t3", "u1", "2024-03-01"),
        ] {
            store
                .put(
                    "transactions",
                    id,
                    json!({ "id": id, "user_id": user, "timestamp": ts }),
                )
                .await
                .unwrap();
        }

        let docs = store
            .query(
                "transactions",
                &[Filter::eq("user_id", "u1")],
                Some(OrderBy::desc("timestamp")),
                Some(1),
            )
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["id"], "t3");
    }
}
