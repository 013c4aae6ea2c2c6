use std::sync::Arc;

use serde_json::{json, Value};

use super::tree::{build_tree, CategoryTree};
use super::types::{category_fields, icon_value};
use super::{CatalogError, CategoryRecord, Icon};
use crate::store::{DocumentStore, Fields, StoreError};
use crate::util::strip_control_chars;

/// CRUD facade over the flat category collection.
///
/// The store has no foreign keys or cascades, so the structural rules live
/// here: names are validated, icons must come from [`Icon`], and a category
/// with subcategories cannot be deleted. Callers re-run [`list`] after every
/// mutation instead of patching a cached tree.
///
/// [`list`]: CategoryRepository::list
#[derive(Clone)]
pub struct CategoryRepository {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl CategoryRepository {
    /// Longest accepted category name, in characters.
    const MAX_NAME_CHARS: usize = 120;

    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// SEC-014: Sanitize and validate a category name.
    ///
    /// Strips control characters, trims whitespace, and rejects empty or
    /// overlong names.
    fn sanitize_name(name: &str) -> Result<String, CatalogError> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            return Err(CatalogError::Validation(
                "category name cannot be empty or whitespace-only".to_string(),
            ));
        }
        if trimmed.chars().count() > Self::MAX_NAME_CHARS {
            return Err(CatalogError::Validation(format!(
                "category name exceeds {} characters",
                Self::MAX_NAME_CHARS
            )));
        }
        Ok(trimmed.to_owned())
    }

    /// Fetch every category and build a fresh tree.
    pub async fn list(&self) -> Result<CategoryTree, CatalogError> {
        let documents = self.store.fetch_all(&self.collection).await?;

        let mut records = Vec::with_capacity(documents.len());
        for doc in &documents {
            match CategoryRecord::from_document(doc) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(category = %doc.id, error = %e, "Skipping malformed category document");
                }
            }
        }

        let tree = build_tree(&records);
        tracing::debug!(records = records.len(), nodes = tree.len(), "Built category tree");
        Ok(tree)
    }

    /// Create a category, returning its store-assigned id.
    ///
    /// `parent_id` is taken from the caller's current tree view and is not
    /// re-checked for existence or cycles.
    pub async fn add(
        &self,
        name: &str,
        icon: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<String, CatalogError> {
        let name = Self::sanitize_name(name)?;
        let icon = Icon::parse_key(icon)?;

        let id = self
            .store
            .insert(&self.collection, category_fields(&name, icon, parent_id))
            .await?;

        tracing::info!(id = %id, name = %name, parent = ?parent_id, "Created category");
        Ok(id)
    }

    /// Rename and re-icon a category. The parent cannot be changed.
    pub async fn rename(
        &self,
        id: &str,
        new_name: &str,
        new_icon: Option<&str>,
    ) -> Result<(), CatalogError> {
        let name = Self::sanitize_name(new_name)?;
        let icon = Icon::parse_key(new_icon)?;

        let mut patch = Fields::new();
        patch.insert("name".to_string(), json!(name));
        patch.insert("icon".to_string(), icon_value(icon));

        self.store
            .update(&self.collection, id, patch)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => CatalogError::CategoryNotFound(id.to_string()),
                other => other.into(),
            })?;

        tracing::info!(id = %id, name = %name, "Updated category");
        Ok(())
    }

    /// Delete a childless category.
    ///
    /// Fails with [`CatalogError::HasChildren`] and writes nothing if any
    /// other category still points at `id` as its parent. A record that the
    /// tree builder excluded for being part of a parent cycle can always be
    /// deleted; whatever pointed at it is then promoted to a root on the next
    /// [`list`](CategoryRepository::list).
    pub async fn delete(&self, id: &str) -> Result<(), CatalogError> {
        let children = self
            .store
            .fetch_where_eq(&self.collection, "parent_id", &Value::String(id.to_string()))
            .await?
            .into_iter()
            .filter(|doc| doc.id != id)
            .count();
        if children > 0 {
            let tree = self.list().await?;
            if tree.excluded().iter().any(|r| r.id == id) {
                tracing::warn!(id = %id, children, "Deleting category caught in a parent cycle");
            } else {
                tracing::debug!(id = %id, children, "Refusing to delete category with subcategories");
                return Err(CatalogError::HasChildren {
                    id: id.to_string(),
                    children,
                });
            }
        }

        self.store
            .delete(&self.collection, id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => CatalogError::CategoryNotFound(id.to_string()),
                other => other.into(),
            })?;

        tracing::info!(id = %id, "Deleted category");
        Ok(())
    }
}
