use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    compare_values, validate_field, Direction, Document, DocumentStore, Fields, StoreError,
    DEFAULT_IN_LIMIT,
};

/// In-process document store.
///
/// Behaves like the hosted store as far as the catalog can observe: opaque
/// uuid ids, an enforced "in" cardinality limit and start-after cursors that
/// fail once the cursor document is gone. Also exposes failure injection and
/// per-primitive call counters so tests can assert on query shapes.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    in_limit: usize,
    unavailable: AtomicBool,
    in_queries: AtomicUsize,
    ordered_queries: AtomicUsize,
    writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_in_limit(DEFAULT_IN_LIMIT)
    }

    pub fn with_in_limit(in_limit: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            in_limit: in_limit.max(1),
            unavailable: AtomicBool::new(false),
            in_queries: AtomicUsize::new(0),
            ordered_queries: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Seed a collection with documents whose ids are chosen by the caller.
    pub fn with_documents(mut self, collection: &str, documents: Vec<Document>) -> Self {
        self.collections
            .get_mut()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        self
    }

    /// Make every primitive fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Number of `fetch_where_in` calls served so far.
    pub fn in_query_count(&self) -> usize {
        self.in_queries.load(AtomicOrdering::SeqCst)
    }

    /// Number of `fetch_ordered` calls served so far.
    pub fn ordered_query_count(&self) -> usize {
        self.ordered_queries.load(AtomicOrdering::SeqCst)
    }

    /// Number of successful insert/update/delete calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(AtomicOrdering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            Err(StoreError::Unavailable(
                "memory store is marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn order_key(doc: &Document, field: &str, other: &Document, direction: Direction) -> Ordering {
        let ord = compare_values(doc.field(field), other.field(field))
            .then_with(|| doc.id.cmp(&other.id));
        match direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }

    async fn fetch_where_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;
        validate_field(field)?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| compare_values(d.field(field), value) == Ordering::Equal)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_where_in(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
    ) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;
        validate_field(field)?;
        if values.len() > self.in_limit {
            return Err(StoreError::InLimitExceeded {
                requested: values.len(),
                limit: self.in_limit,
            });
        }
        self.in_queries.fetch_add(1, AtomicOrdering::SeqCst);

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| {
                        values
                            .iter()
                            .any(|v| compare_values(d.field(field), v) == Ordering::Equal)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_ordered(
        &self,
        collection: &str,
        field: &str,
        direction: Direction,
        limit: usize,
        start_after: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;
        validate_field(field)?;
        self.ordered_queries.fetch_add(1, AtomicOrdering::SeqCst);

        let collections = self.collections.read().await;
        let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);

        let cursor = match start_after {
            Some(id) => Some(
                docs.iter()
                    .find(|d| d.id == id)
                    .ok_or_else(|| StoreError::CursorNotFound(id.to_string()))?,
            ),
            None => None,
        };

        let mut sorted: Vec<&Document> = docs
            .iter()
            .filter(|d| match cursor {
                Some(c) => Self::order_key(d, field, c, direction) == Ordering::Greater,
                None => true,
            })
            .collect();
        sorted.sort_by(|a, b| Self::order_key(a, field, b, direction));

        Ok(sorted.into_iter().take(limit).cloned().collect())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .cloned())
    }

    async fn insert(&self, collection: &str, data: Fields) -> Result<String, StoreError> {
        self.check_available()?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(Document::new(id.clone(), data));
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        doc.data.extend(patch);
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        let idx = docs
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        docs.remove(idx);
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn max_in_values(&self) -> usize {
        self.in_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, body: Value) -> Document {
        match body {
            Value::Object(map) => Document::new(id, map),
            _ => panic!("document body must be an object"),
        }
    }

    fn seeded() -> MemoryStore {
        MemoryStore::with_in_limit(2).with_documents(
            "courses",
            vec![
                doc("a", json!({"category_id": "x", "created_at": 10})),
                doc("b", json!({"category_id": "y", "created_at": 30})),
                doc("c", json!({"category_id": "z", "created_at": 20})),
                doc("d", json!({"category_id": "x", "created_at": 30})),
            ],
        )
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_insertion_order() {
        let store = seeded();
        let docs = store.fetch_all("courses").await.unwrap();
        assert_eq!(ids(&docs), vec!["a", "b", "c", "d"]);
        assert!(store.fetch_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_where_eq_matches_missing_as_null() {
        let store = MemoryStore::new().with_documents(
            "categories",
            vec![
                doc("root", json!({"name": "Root"})),
                doc("child", json!({"name": "Child", "parent_id": "root"})),
            ],
        );
        let roots = store
            .fetch_where_eq("categories", "parent_id", &Value::Null)
            .await
            .unwrap();
        assert_eq!(ids(&roots), vec!["root"]);
    }

    #[tokio::test]
    async fn test_fetch_where_in_enforces_limit() {
        let store = seeded();
        let err = store
            .fetch_where_in("courses", "category_id", &[json!("x"), json!("y"), json!("z")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InLimitExceeded {
                requested: 3,
                limit: 2
            }
        ));

        let docs = store
            .fetch_where_in("courses", "category_id", &[json!("x"), json!("z")])
            .await
            .unwrap();
        assert_eq!(ids(&docs), vec!["a", "c", "d"]);
        assert_eq!(store.in_query_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_ordered_desc_breaks_ties_by_id() {
        let store = seeded();
        let docs = store
            .fetch_ordered("courses", "created_at", Direction::Descending, 10, None)
            .await
            .unwrap();
        assert_eq!(ids(&docs), vec!["d", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_fetch_ordered_start_after() {
        let store = seeded();
        let docs = store
            .fetch_ordered("courses", "created_at", Direction::Descending, 2, Some("b"))
            .await
            .unwrap();
        assert_eq!(ids(&docs), vec!["c", "a"]);

        let asc = store
            .fetch_ordered("courses", "created_at", Direction::Ascending, 10, Some("c"))
            .await
            .unwrap();
        assert_eq!(ids(&asc), vec!["b", "d"]);
    }

    #[tokio::test]
    async fn test_fetch_ordered_missing_cursor() {
        let store = seeded();
        let err = store
            .fetch_ordered("courses", "created_at", Direction::Descending, 2, Some("gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CursorNotFound(id) if id == "gone"));
    }

    #[tokio::test]
    async fn test_insert_update_delete() {
        let store = MemoryStore::new();
        let mut data = Fields::new();
        data.insert("name".into(), json!("Math"));
        data.insert("icon".into(), json!("calculator"));
        let id = store.insert("categories", data).await.unwrap();

        let mut patch = Fields::new();
        patch.insert("icon".into(), Value::Null);
        store.update("categories", &id, patch).await.unwrap();

        let stored = store.get("categories", &id).await.unwrap().unwrap();
        assert_eq!(stored.field("name"), &json!("Math"));
        assert_eq!(stored.field("icon"), &Value::Null);

        store.delete("categories", &id).await.unwrap();
        assert!(store.get("categories", &id).await.unwrap().is_none());
        assert!(matches!(
            store.delete("categories", &id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_primitive() {
        let store = seeded();
        store.set_unavailable(true);
        assert!(matches!(
            store.fetch_all("courses").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.get("courses", "a").await.is_err());
        store.set_unavailable(false);
        assert!(store.get("courses", "a").await.unwrap().is_some());
    }
}
