//! Category tree engine and category-filtered course pagination.
//!
//! The crate is organised leaf-first:
//!
//! - [`store`]: the document store contract plus in-memory and SQLite adapters
//! - [`catalog`]: tree building, subtree resolution, the category repository,
//!   the course query engine and the page state machine
//! - [`config`]: TOML configuration for page and chunk sizes
//! - [`util`]: text helpers shared by the catalog and the CLI

pub mod catalog;
pub mod config;
pub mod store;
pub mod util;
