//! Document Store Trait
//!
//! This module defines the `DocumentStore` trait, the engine's only view of
//! the underlying key-document database. Collections hold JSON documents
//! addressed by string ids, with simple equality/range queries.
//!
//! ## Benefits
//! - Decouples trading logic from any concrete database
//! - Enables easy mocking for testing
//! - Keeps the store swappable (SQLite locally, anything document-shaped in
//!   production)

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Common result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("document is not valid JSON: {0}")]
    Corrupt(String),
}

/// Comparison operator for a query filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

/// A single equality/range condition on a top-level document field
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter {
            field: field.to_string(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Filter {
            field: field.to_string(),
            op: FilterOp::Gte,
            value: value.into(),
        }
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Filter {
            field: field.to_string(),
            op: FilterOp::Lte,
            value: value.into(),
        }
    }
}

/// Single-field ordering for query results
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn desc(field: &str) -> Self {
        OrderBy {
            field: field.to_string(),
            descending: true,
        }
    }

    pub fn asc(field: &str) -> Self {
        OrderBy {
            field: field.to_string(),
            descending: false,
        }
    }
}

/// Abstract key-document store. Implementations stamp an `updated_at`
/// timestamp onto every written document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id; `None` when absent.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Query a collection with optional filters, ordering, and limit.
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<OrderBy>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>>;

    /// Create or fully replace a document.
    async fn put(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()>;

    /// Shallow-merge fields into an existing document. `NotFound` if absent.
    async fn update(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()>;

    /// Remove a document. Deleting an absent document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;
}

/// Shared filter evaluation so every store backend agrees on semantics.
pub fn matches_filters(doc: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        let Some(field) = doc.get(&filter.field) else {
            return false;
        };
        match filter.op {
            FilterOp::Eq => field == &filter.value,
            FilterOp::Gte => compare_values(field, &filter.value).is_some_and(|o| o.is_ge()),
            FilterOp::Lte => compare_values(field, &filter.value).is_some_and(|o| o.is_le()),
        }
    })
}

/// Shared ordering: sorts in place by the order field, then truncates.
pub fn apply_order_and_limit(docs: &mut Vec<Value>, order: Option<&OrderBy>, limit: Option<usize>) {
    if let Some(order) = order {
        docs.sort_by(|a, b| {
            let lhs = a.get(&order.field);
            let rhs = b.get(&order.field);
            let ord = match (lhs, rhs) {
                (Some(l), Some(r)) => {
                    compare_values(l, r).unwrap_or(std::cmp::Ordering::Equal)
                }
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (None, None) => std::cmp::Ordering::Equal,
            };
            if order.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
    if let Some(limit) = limit {
        docs.truncate(limit);
    }
}

fn compare_values(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}
