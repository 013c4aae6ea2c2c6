//! Accumulated course listing state.
//!
//! `PageState` is a small state machine. Every request it starts is issued a
//! [`LoadTicket`] stamped with the current generation; a completion is only
//! applied if its generation is still current. Changing the filter or
//! starting a fresh load bumps the generation, so a response that arrives
//! after the user moved on is dropped instead of being appended to the wrong
//! list.

use super::courses::{CoursePage, PagePosition};
use super::{CatalogError, CourseRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Loaded,
    LoadingMore,
    Error,
}

/// Failure of the most recent request, kept for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageError {
    pub message: String,
    pub retryable: bool,
}

/// A request issued by [`PageState`]. Hand it back to
/// [`PageState::complete`] together with the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub generation: u64,
    pub filter: Option<String>,
    pub position: PagePosition,
    /// Append to the current items instead of replacing them.
    pub append: bool,
}

#[derive(Debug, Clone)]
pub struct PageState {
    filter: Option<String>,
    items: Vec<CourseRecord>,
    next: Option<PagePosition>,
    has_more: bool,
    total: Option<usize>,
    phase: Phase,
    error: Option<PageError>,
    /// Set after an invalid cursor: the next load must start from page one.
    needs_restart: bool,
    generation: u64,
}

impl Default for PageState {
    fn default() -> Self {
        Self::new()
    }
}

impl PageState {
    pub fn new() -> Self {
        Self {
            filter: None,
            items: Vec::new(),
            next: None,
            has_more: false,
            total: None,
            phase: Phase::Idle,
            error: None,
            needs_restart: false,
            generation: 0,
        }
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn items(&self) -> &[CourseRecord] {
        &self.items
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn error(&self) -> Option<&PageError> {
        self.error.as_ref()
    }

    pub fn needs_restart(&self) -> bool {
        self.needs_restart
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Loading | Phase::LoadingMore)
    }

    /// Switch the category filter.
    ///
    /// Clears everything accumulated under the old filter and invalidates any
    /// request still in flight. Returns `false` if the filter is unchanged.
    pub fn set_filter(&mut self, filter: Option<String>) -> bool {
        if self.filter == filter {
            return false;
        }
        self.filter = filter;
        self.reset();
        true
    }

    fn reset(&mut self) {
        self.items.clear();
        self.next = None;
        self.has_more = false;
        self.total = None;
        self.phase = Phase::Idle;
        self.error = None;
        self.needs_restart = false;
        self.generation += 1;
    }

    /// Start loading the first page, discarding current items.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.reset();
        self.phase = Phase::Loading;
        LoadTicket {
            generation: self.generation,
            filter: self.filter.clone(),
            position: PagePosition::Start,
            append: false,
        }
    }

    /// Start loading the next page.
    ///
    /// Allowed from `Loaded` with more pages pending, or from `Error` after a
    /// failed load-more (retry). Returns `None` otherwise.
    pub fn begin_load_more(&mut self) -> Option<LoadTicket> {
        let retry = self.phase == Phase::Error && !self.items.is_empty();
        if !(self.phase == Phase::Loaded || retry) || !self.has_more || self.needs_restart {
            return None;
        }
        let position = self.next.clone()?;

        self.generation += 1;
        self.phase = Phase::LoadingMore;
        self.error = None;
        Some(LoadTicket {
            generation: self.generation,
            filter: self.filter.clone(),
            position,
            append: true,
        })
    }

    /// Apply the result of `ticket`.
    ///
    /// Returns `false` and leaves the state untouched when the ticket is
    /// stale.
    pub fn complete(
        &mut self,
        ticket: &LoadTicket,
        result: Result<CoursePage, CatalogError>,
    ) -> bool {
        if ticket.generation != self.generation {
            tracing::warn!(
                ticket = ticket.generation,
                current = self.generation,
                "Discarding stale course page response"
            );
            return false;
        }

        match result {
            Ok(page) => {
                if ticket.append {
                    self.items.extend(page.items);
                } else {
                    self.items = page.items;
                }
                self.next = page.next;
                self.has_more = page.has_more;
                self.total = page.total;
                self.phase = Phase::Loaded;
                self.error = None;
                self.needs_restart = false;
            }
            Err(err) => {
                tracing::warn!(error = %err, append = ticket.append, "Course page load failed");
                if matches!(err, CatalogError::InvalidCursor(_)) {
                    self.next = None;
                    self.has_more = false;
                    self.needs_restart = true;
                }
                // A failed load-more keeps what is already on screen.
                if !ticket.append {
                    self.items.clear();
                }
                self.error = Some(PageError {
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                });
                self.phase = Phase::Error;
            }
        }
        true
    }
}
