//! Category tree engine and course listing.
//!
//! Categories are stored flat, one record per category with a parent
//! pointer. Every read rebuilds a fresh [`CategoryTree`] from those records;
//! nothing holds a long-lived nested structure. The tree resolves a selected
//! category into the closed set of ids used to filter courses.

mod browser;
mod categories;
mod courses;
mod error;
mod icon;
mod page;
mod tree;
mod types;

pub use browser::{BrowserEvent, CourseBrowser};
pub use categories::CategoryRepository;
pub use courses::{
    CoursePage, CourseQueryEngine, PagePosition, QueryOptions, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use error::CatalogError;
pub use icon::Icon;
pub use page::{LoadTicket, PageError, PageState, Phase};
pub use tree::{build_tree, closed_set, CategoryTree, DepthFirst, UNCATEGORIZED};
pub use types::{CategoryNode, CategoryRecord, CourseRecord, NewCourse};
