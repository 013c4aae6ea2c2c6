//! Document store contract consumed by the catalog.
//!
//! The catalog never talks to a database directly. It speaks to a
//! [`DocumentStore`]: flat collections of JSON documents addressed by an
//! opaque, store-assigned id, queried with equality, small "in" lists and a
//! single ordered scan with a start-after cursor. These are exactly the
//! primitives a hosted document database offers without composite indexes,
//! which is why the query engine has to chunk and sort in memory.
//!
//! Two adapters ship with the crate:
//!
//! - [`MemoryStore`]: in-process, used as the test double
//! - [`SqliteStore`]: sqlx/SQLite, used by the CLI

mod memory;
mod sqlite;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Upper bound on values in a single "in" predicate, matching the limit of
/// the hosted store the console was built against.
pub const DEFAULT_IN_LIMIT: usize = 30;

/// JSON object body of a document (everything but the id).
pub type Fields = Map<String, Value>;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the request.
    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    /// Another process holds the SQLite database lock.
    #[error("Another instance appears to be using the database. Please close it and try again.")]
    InstanceLocked,

    #[error("Database migration failed: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    /// The start-after document of an ordered scan no longer exists.
    #[error("Cursor document {0} does not exist")]
    CursorNotFound(String),

    #[error("'in' predicate has {requested} values, the store accepts at most {limit}")]
    InLimitExceeded { requested: usize, limit: usize },

    #[error("Invalid field name: {0:?}")]
    InvalidField(String),

    #[error("Unsupported filter value: {0}")]
    UnsupportedValue(String),
}

impl StoreError {
    /// Transport-level failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::InstanceLocked | StoreError::Database(_)
        )
    }

    pub(crate) fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// A stored document: store-assigned id plus its JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Fields) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn field(&self, name: &str) -> &Value {
        self.data.get(name).unwrap_or(&Value::Null)
    }

    /// Deserialize the document body into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

/// Sort direction for [`DocumentStore::fetch_ordered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

// ============================================================================
// Store Contract
// ============================================================================

/// Primitives of the hosted document store.
///
/// Implementations must be `Send + Sync`: the query engine fans chunked
/// "in" queries out concurrently and the browser runs loads on tokio tasks.
///
/// Ordered scans sort by the requested field and break ties by document id
/// in the same direction, so a `(value, id)` pair is a total order and
/// start-after cursors never skip or repeat documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document of a collection, in insertion order.
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Documents whose `field` equals `value` (`null` matches missing fields).
    async fn fetch_where_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError>;

    /// Documents whose `field` is one of `values`.
    ///
    /// Fails with [`StoreError::InLimitExceeded`] when `values` is longer
    /// than [`DocumentStore::max_in_values`]; callers must chunk.
    async fn fetch_where_in(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
    ) -> Result<Vec<Document>, StoreError>;

    /// Up to `limit` documents ordered by `field`, starting after the
    /// document `start_after` when given.
    ///
    /// Fails with [`StoreError::CursorNotFound`] if the cursor document has
    /// been deleted.
    async fn fetch_ordered(
        &self,
        collection: &str,
        field: &str,
        direction: Direction,
        limit: usize,
        start_after: Option<&str>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert a new document and return its store-assigned id.
    async fn insert(&self, collection: &str, data: Fields) -> Result<String, StoreError>;

    /// Merge `patch` into an existing document. Keys set to `null` are stored
    /// as `null`.
    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Cardinality limit of [`DocumentStore::fetch_where_in`].
    fn max_in_values(&self) -> usize {
        DEFAULT_IN_LIMIT
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Field names are interpolated into JSON paths, so only plain identifiers
/// are accepted.
pub(crate) fn validate_field(field: &str) -> Result<(), StoreError> {
    let mut chars = field.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidField(field.to_string()))
    }
}

/// Total order over scalar JSON values: null < number < string.
///
/// Booleans compare as the integers 0 and 1, which is what SQLite's
/// `json_extract` returns for them, so both adapters agree on ordered scans.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) | Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
        }
    }

    fn as_i64(v: &Value) -> Option<i64> {
        match v {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    fn as_f64(v: &Value) -> f64 {
        match v {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    match (rank(a), rank(b)) {
        (1, 1) => match (as_i64(a), as_i64(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => as_f64(a).partial_cmp(&as_f64(b)).unwrap_or(Ordering::Equal),
        },
        (2, 2) => match (a, b) {
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
        (ra, rb) => ra.cmp(&rb),
    }
}
