use thiserror::Error;

use crate::store::StoreError;

/// Domain errors surfaced by the category repository and course query engine.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Attempted to delete a category that still has subcategories.
    #[error("Cannot delete category {id}: it has {children} subcategories")]
    HasChildren { id: String, children: usize },

    /// The pagination cursor document no longer exists; restart from page one.
    #[error("Pagination cursor {0} no longer exists")]
    InvalidCursor(String),

    /// Rejected input; nothing was written.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Category {0} not found")]
    CategoryNotFound(String),

    #[error("Course {0} not found")]
    CourseNotFound(String),

    /// A background load ended without producing a page.
    #[error("Load interrupted: {0}")]
    Interrupted(String),

    #[error(transparent)]
    Store(StoreError),
}

impl CatalogError {
    /// Whether the failure is a transport problem worth offering a retry for.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Store(e) => e.is_transient(),
            CatalogError::Interrupted(_) => true,
            _ => false,
        }
    }
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CursorNotFound(id) => CatalogError::InvalidCursor(id),
            other => CatalogError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_cursor_becomes_invalid_cursor() {
        let err: CatalogError = StoreError::CursorNotFound("c1".into()).into();
        assert!(matches!(err, CatalogError::InvalidCursor(id) if id == "c1"));
    }

    #[test]
    fn test_retryable() {
        let err: CatalogError = StoreError::Unavailable("timeout".into()).into();
        assert!(err.is_retryable());
        assert!(!CatalogError::Validation("empty name".into()).is_retryable());
        assert!(!CatalogError::HasChildren {
            id: "a".into(),
            children: 1
        }
        .is_retryable());
    }
}
