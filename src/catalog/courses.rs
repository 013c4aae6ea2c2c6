use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::{json, Value};

use super::tree::CategoryTree;
use super::{CatalogError, CourseRecord, NewCourse};
use crate::store::{Direction, DocumentStore, Fields, StoreError};
use crate::util::strip_control_chars;

/// Courses per page when nothing else is configured.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Where the next page starts.
///
/// The two listing strategies paginate differently: the unfiltered listing
/// walks a store cursor, the subtree listing re-slices an in-memory result by
/// offset. A position from one strategy is rejected by the other.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PagePosition {
    #[default]
    Start,
    /// Resume after this course id (unfiltered listing).
    After(String),
    /// Skip this many matches (subtree listing).
    Offset(usize),
}

/// One page of courses, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct CoursePage {
    pub items: Vec<CourseRecord>,
    /// Position of the following page; `None` once exhausted.
    pub next: Option<PagePosition>,
    pub has_more: bool,
    /// Total matches. Only known for subtree listings, which fetch them all.
    pub total: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub collection: String,
    pub page_size: usize,
    /// Upper bound for values per "in" query. The store's own limit wins if
    /// it is lower.
    pub chunk_size: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            collection: "courses".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: crate::store::DEFAULT_IN_LIMIT,
        }
    }
}

/// Answers the two course listing shapes: everything newest first, and
/// everything inside a category subtree newest first.
///
/// The subtree listing cannot be sorted by the store (an "in" filter plus an
/// order clause would need a composite index), so it fetches every match
/// across chunked queries, sorts in memory and slices by offset. That is a
/// hard scalability ceiling: fine for hundreds to a few thousand matches, not
/// for large catalogs.
#[derive(Clone)]
pub struct CourseQueryEngine {
    store: Arc<dyn DocumentStore>,
    options: QueryOptions,
}

impl CourseQueryEngine {
    const MAX_NAME_CHARS: usize = 200;
    const MAX_RATING: f64 = 5.0;

    pub fn new(store: Arc<dyn DocumentStore>, mut options: QueryOptions) -> Self {
        let page_size = options.page_size.clamp(1, MAX_PAGE_SIZE);
        if page_size != options.page_size {
            tracing::warn!(
                requested = options.page_size,
                using = page_size,
                "page_size out of range 1..={}",
                MAX_PAGE_SIZE
            );
            options.page_size = page_size;
        }
        options.chunk_size = options.chunk_size.max(1);
        Self { store, options }
    }

    pub fn page_size(&self) -> usize {
        self.options.page_size
    }

    /// Values per "in" query after applying the store's cardinality limit.
    pub fn effective_chunk_size(&self) -> usize {
        self.options
            .chunk_size
            .min(self.store.max_in_values())
            .max(1)
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Fetch one page, optionally restricted to the subtree rooted at
    /// `filter`.
    pub async fn fetch_page(
        &self,
        tree: &CategoryTree,
        filter: Option<&str>,
        position: &PagePosition,
    ) -> Result<CoursePage, CatalogError> {
        match (filter, position) {
            (None, PagePosition::Offset(_)) => Err(CatalogError::Validation(
                "offset positions apply only to category-filtered listings".to_string(),
            )),
            (Some(_), PagePosition::After(_)) => Err(CatalogError::Validation(
                "cursor positions apply only to unfiltered listings".to_string(),
            )),
            (None, PagePosition::Start) => self.fetch_recent(None).await,
            (None, PagePosition::After(cursor)) => self.fetch_recent(Some(cursor)).await,
            (Some(category), PagePosition::Start) => {
                self.fetch_in_subtree(tree, category, 0).await
            }
            (Some(category), PagePosition::Offset(offset)) => {
                self.fetch_in_subtree(tree, category, *offset).await
            }
        }
    }

    /// Cursor strategy: ask for one row more than a page to learn whether
    /// another page exists without a count query.
    async fn fetch_recent(&self, cursor: Option<&str>) -> Result<CoursePage, CatalogError> {
        let page_size = self.options.page_size;
        let docs = self
            .store
            .fetch_ordered(
                &self.options.collection,
                "created_at",
                Direction::Descending,
                page_size.saturating_add(1),
                cursor,
            )
            .await?;

        let mut items = docs
            .iter()
            .map(CourseRecord::from_document)
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = items.len() > page_size;
        items.truncate(page_size);
        let next = if has_more {
            items.last().map(|c| PagePosition::After(c.id.clone()))
        } else {
            None
        };

        tracing::debug!(
            cursor = ?cursor,
            returned = items.len(),
            has_more,
            "Fetched course page"
        );

        Ok(CoursePage {
            items,
            next,
            has_more,
            total: None,
        })
    }

    /// Offset strategy over the full, freshly recomputed subtree match set.
    async fn fetch_in_subtree(
        &self,
        tree: &CategoryTree,
        category: &str,
        offset: usize,
    ) -> Result<CoursePage, CatalogError> {
        let ids = tree
            .closed_set_of(category)
            .ok_or_else(|| CatalogError::CategoryNotFound(category.to_string()))?;

        let matches = self.fetch_subtree_matches(&ids).await?;
        let total = matches.len();
        let end = offset.saturating_add(self.options.page_size).min(total);
        let items = if offset < total {
            matches[offset..end].to_vec()
        } else {
            Vec::new()
        };
        let has_more = end < total;

        tracing::debug!(
            category = %category,
            subtree = ids.len(),
            offset,
            total,
            "Fetched filtered course page"
        );

        Ok(CoursePage {
            items,
            next: has_more.then_some(PagePosition::Offset(end)),
            has_more,
            total: Some(total),
        })
    }

    /// Every course tagged with one of `category_ids`, newest first.
    ///
    /// Ids are split into chunks no larger than the store's "in" limit and the
    /// chunk queries run concurrently. Nothing is returned until every chunk
    /// has answered; one failed chunk fails the whole call.
    pub async fn fetch_subtree_matches(
        &self,
        category_ids: &BTreeSet<String>,
    ) -> Result<Vec<CourseRecord>, CatalogError> {
        let values: Vec<Value> = category_ids
            .iter()
            .map(|id| Value::String(id.clone()))
            .collect();
        let chunk_size = self.effective_chunk_size();

        let queries = values.chunks(chunk_size).map(|chunk| {
            self.store
                .fetch_where_in(&self.options.collection, "category_id", chunk)
        });
        let results = try_join_all(queries).await?;

        tracing::debug!(
            ids = values.len(),
            chunks = results.len(),
            chunk_size,
            "Merged chunked category queries"
        );

        // category_id is scalar so chunks cannot overlap, but a store that
        // returns a document twice must not duplicate a course.
        let mut seen = HashSet::new();
        let mut courses = Vec::new();
        for doc in results.into_iter().flatten() {
            if seen.insert(doc.id.clone()) {
                courses.push(CourseRecord::from_document(&doc)?);
            }
        }

        sort_newest_first(&mut courses);
        Ok(courses)
    }

    // ========================================================================
    // Courses
    // ========================================================================

    /// Create a course stamped with the current time. Returns its id.
    pub async fn create_course(&self, course: NewCourse) -> Result<String, CatalogError> {
        let name = strip_control_chars(&course.name);
        let name = name.trim();
        if name.is_empty() {
            return Err(CatalogError::Validation(
                "course name cannot be empty".to_string(),
            ));
        }
        if name.chars().count() > Self::MAX_NAME_CHARS {
            return Err(CatalogError::Validation(format!(
                "course name exceeds {} characters",
                Self::MAX_NAME_CHARS
            )));
        }
        if let Some(rating) = course.rating {
            if !rating.is_finite() || !(0.0..=Self::MAX_RATING).contains(&rating) {
                return Err(CatalogError::Validation(format!(
                    "rating must be between 0 and {}",
                    Self::MAX_RATING
                )));
            }
        }

        let created_at = chrono::Utc::now().timestamp();
        let mut fields = Fields::new();
        fields.insert("name".to_string(), json!(name));
        fields.insert("description".to_string(), json!(course.description.trim()));
        fields.insert("category_id".to_string(), json!(course.category_id));
        fields.insert("participants".to_string(), json!(course.participants));
        fields.insert("rating".to_string(), json!(course.rating));
        fields.insert("created_at".to_string(), json!(created_at));

        let id = self.store.insert(&self.options.collection, fields).await?;
        tracing::info!(id = %id, name = %name, category = ?course.category_id, "Created course");
        Ok(id)
    }

    pub async fn get_course(&self, id: &str) -> Result<CourseRecord, CatalogError> {
        let doc = self
            .store
            .get(&self.options.collection, id)
            .await?
            .ok_or_else(|| CatalogError::CourseNotFound(id.to_string()))?;
        Ok(CourseRecord::from_document(&doc)?)
    }

    /// Courses per category, counting everything in each category's subtree.
    pub async fn category_counts(
        &self,
        tree: &CategoryTree,
    ) -> Result<HashMap<String, usize>, CatalogError> {
        let docs = self.store.fetch_all(&self.options.collection).await?;
        let courses = docs
            .iter()
            .map(CourseRecord::from_document)
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(tree.course_counts(&courses))
    }
}

/// `created_at` descending, ties by id descending. Matches the store's
/// ordered scan so both strategies agree on order.
fn sort_newest_first(courses: &mut [CourseRecord]) {
    courses.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
