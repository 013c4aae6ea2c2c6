//! Async driver for the course listing screen.
//!
//! Owns the current category tree snapshot and a [`PageState`]. Loads can be
//! awaited inline or spawned on tokio; spawned loads report back through
//! [`BrowserEvent`] on an mpsc channel and the caller feeds the event into
//! [`CourseBrowser::handle_event`]. Starting a new load aborts the previous
//! task, and the generation check in `PageState` drops anything that still
//! slips through.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::categories::CategoryRepository;
use super::courses::{CoursePage, CourseQueryEngine};
use super::page::{LoadTicket, PageState};
use super::tree::CategoryTree;
use super::CatalogError;

/// Events from background load tasks.
#[derive(Debug)]
pub enum BrowserEvent {
    PageLoaded {
        ticket: LoadTicket,
        result: Result<CoursePage, CatalogError>,
    },
}

pub struct CourseBrowser {
    repository: CategoryRepository,
    engine: CourseQueryEngine,
    tree: Arc<CategoryTree>,
    page: PageState,
    load_handle: Option<JoinHandle<()>>,
}

impl CourseBrowser {
    pub fn new(repository: CategoryRepository, engine: CourseQueryEngine) -> Self {
        Self {
            repository,
            engine,
            tree: Arc::new(CategoryTree::default()),
            page: PageState::new(),
            load_handle: None,
        }
    }

    pub fn tree(&self) -> &CategoryTree {
        &self.tree
    }

    pub fn page(&self) -> &PageState {
        &self.page
    }

    pub fn repository(&self) -> &CategoryRepository {
        &self.repository
    }

    pub fn engine(&self) -> &CourseQueryEngine {
        &self.engine
    }

    /// Reload the category tree. Run after every category mutation.
    ///
    /// If the selected category disappeared, the filter falls back to all
    /// courses.
    pub async fn refresh_categories(&mut self) -> Result<(), CatalogError> {
        let tree = self.repository.list().await?;
        self.tree = Arc::new(tree);

        if let Some(selected) = self.page.filter() {
            if self.tree.locate(selected).is_none() {
                tracing::info!(category = %selected, "Selected category no longer exists, clearing filter");
                self.abort_load();
                self.page.set_filter(None);
            }
        }
        Ok(())
    }

    /// Select the category to filter by, or `None` for all courses.
    ///
    /// Returns `true` if the selection changed; accumulated results are
    /// cleared and any in-flight load is abandoned.
    pub fn select_category(&mut self, category: Option<&str>) -> Result<bool, CatalogError> {
        if let Some(id) = category {
            if self.tree.locate(id).is_none() {
                return Err(CatalogError::CategoryNotFound(id.to_string()));
            }
        }
        if self.page.filter() == category {
            return Ok(false);
        }
        self.abort_load();
        self.page.set_filter(category.map(str::to_string));
        tracing::debug!(category = ?category, "Changed course filter");
        Ok(true)
    }

    // ========================================================================
    // Inline loads
    // ========================================================================

    /// Load the first page and wait for it. Failures land in
    /// [`PageState::error`].
    pub async fn load_first(&mut self) -> bool {
        self.abort_load();
        let ticket = self.page.begin_load();
        let result = fetch(&self.engine, &self.tree, &ticket).await;
        self.page.complete(&ticket, result)
    }

    /// Load the next page and wait for it.
    ///
    /// After an invalid cursor this restarts from page one. Returns `false`
    /// when there is nothing more to load.
    pub async fn load_more(&mut self) -> bool {
        if self.page.needs_restart() {
            return self.load_first().await;
        }
        let Some(ticket) = self.page.begin_load_more() else {
            return false;
        };
        self.abort_load();
        let result = fetch(&self.engine, &self.tree, &ticket).await;
        self.page.complete(&ticket, result)
    }

    // ========================================================================
    // Background loads
    // ========================================================================

    /// Load the first page on a tokio task.
    pub fn spawn_load(&mut self, tx: mpsc::Sender<BrowserEvent>) {
        let ticket = self.page.begin_load();
        self.spawn(ticket, tx);
    }

    /// Load the next page on a tokio task. Returns `false` when there is
    /// nothing to load.
    pub fn spawn_load_more(&mut self, tx: mpsc::Sender<BrowserEvent>) -> bool {
        if self.page.needs_restart() {
            self.spawn_load(tx);
            return true;
        }
        match self.page.begin_load_more() {
            Some(ticket) => {
                self.spawn(ticket, tx);
                true
            }
            None => false,
        }
    }

    fn spawn(&mut self, ticket: LoadTicket, tx: mpsc::Sender<BrowserEvent>) {
        self.abort_load();

        let engine = self.engine.clone();
        let tree = Arc::clone(&self.tree);
        let generation = ticket.generation;

        self.load_handle = Some(tokio::spawn(async move {
            let result = match AssertUnwindSafe(fetch(&engine, &tree, &ticket))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic);
                    tracing::error!(task = "course_load", generation, error = %message, "Background task panicked");
                    Err(CatalogError::Interrupted(message))
                }
            };

            if let Err(e) = tx.send(BrowserEvent::PageLoaded { ticket, result }).await {
                tracing::warn!(error = %e, event = "PageLoaded", "Channel send failed (receiver dropped)");
            }
        }));
    }

    /// Apply a background event. Returns `false` if it was stale.
    pub fn handle_event(&mut self, event: BrowserEvent) -> bool {
        match event {
            BrowserEvent::PageLoaded { ticket, result } => {
                let applied = self.page.complete(&ticket, result);
                if applied {
                    self.load_handle = None;
                }
                applied
            }
        }
    }

    fn abort_load(&mut self) {
        if let Some(handle) = self.load_handle.take() {
            handle.abort();
            tracing::debug!("Aborted in-flight course load");
        }
    }
}

impl Drop for CourseBrowser {
    fn drop(&mut self) {
        self.abort_load();
    }
}

async fn fetch(
    engine: &CourseQueryEngine,
    tree: &CategoryTree,
    ticket: &LoadTicket,
) -> Result<CoursePage, CatalogError> {
    engine
        .fetch_page(tree, ticket.filter.as_deref(), &ticket.position)
        .await
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
