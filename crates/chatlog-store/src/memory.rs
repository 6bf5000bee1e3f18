//! In-memory page source
//!
//! This module provides an in-memory [`PageSource`], suitable for testing
//! and simulation environments. Pages can be made to fail on demand to
//! exercise the error paths of iterators and walkers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chatlog_core::{Account, Entity, Event, EventMask};
use dashmap::{DashMap, DashSet};
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::source::{PageKey, PageSource, SearchHit, contains_text, sorted_hits};

/// In-memory implementation of PageSource
///
/// Events are grouped by target identifier and by the UTC date of their
/// timestamp. Clones share the same contents and counters.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPageSource {
    name: String,
    /// Map from target identifier to its pages
    pages: Arc<DashMap<String, BTreeMap<PageKey, Vec<Event>>>>,
    /// Pages whose load fails
    failing: Arc<DashSet<PageKey>>,
    /// Whether page listing fails
    fail_listing: Arc<AtomicBool>,
    /// Number of page loads served
    loads: Arc<AtomicUsize>,
}

impl InMemoryPageSource {
    /// Create an empty source
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create a source holding `events`
    pub fn with_events(name: impl Into<String>, events: impl IntoIterator<Item = Event>) -> Self {
        let source = Self::new(name);
        for event in events {
            source.push(event);
        }
        source
    }

    /// Append an event to the page of its date
    pub fn push(&self, event: Event) {
        let page = page_of(&event);
        self.pages
            .entry(event.target().identifier().to_string())
            .or_default()
            .entry(page)
            .or_default()
            .push(event);
    }

    /// Make loads of `page` fail until [`Self::clear_failures`] is called
    pub fn fail_page(&self, page: PageKey) {
        self.failing.insert(page);
    }

    /// Make page listing and search fail
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        self.failing.clear();
        self.fail_listing.store(false, Ordering::SeqCst);
    }

    /// Number of page loads served so far, failed ones included
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Total number of events held
    pub fn len(&self) -> usize {
        self.pages
            .iter()
            .map(|entry| entry.value().values().map(Vec::len).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// UTC date an event is paged under
pub fn page_of(event: &Event) -> PageKey {
    event
        .datetime()
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

#[async_trait]
impl PageSource for InMemoryPageSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_pages(
        &self,
        _account: &Account,
        target: &Entity,
        _mask: EventMask,
    ) -> Result<Vec<PageKey>, StoreError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StoreError::store_read(
                PathBuf::from(&self.name),
                "listing failed",
            ));
        }
        let pages = self
            .pages
            .get(target.identifier())
            .map(|pages| pages.keys().copied().collect())
            .unwrap_or_default();
        trace!(source = %self.name, ?pages, "Listed pages");
        Ok(pages)
    }

    async fn load_page(
        &self,
        _account: &Account,
        target: &Entity,
        mask: EventMask,
        page: PageKey,
    ) -> Result<Vec<Event>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&page) {
            debug!(source = %self.name, %page, "Injected page failure");
            return Err(StoreError::store_read(
                PathBuf::from(&self.name).join(page.to_string()),
                "injected failure",
            ));
        }
        Ok(self
            .pages
            .get(target.identifier())
            .and_then(|pages| pages.get(&page).cloned())
            .unwrap_or_default()
            .into_iter()
            .filter(|e| mask.matches(e))
            .collect())
    }

    async fn exists(&self, _account: &Account, target: &Entity, _mask: EventMask) -> bool {
        self.pages.contains_key(target.identifier())
    }

    async fn list_entities(&self, _account: &Account) -> Result<Vec<Entity>, StoreError> {
        let mut entities: Vec<Entity> = self
            .pages
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .values()
                    .flatten()
                    .next()
                    .map(|event| event.target().clone())
            })
            .collect();
        entities.sort_by(|a, b| a.identifier().cmp(b.identifier()));
        Ok(entities)
    }

    async fn search(&self, text: &str, mask: EventMask) -> Result<Vec<SearchHit>, StoreError> {
        if text.is_empty() || !mask.intersects(EventMask::TEXT) {
            return Ok(Vec::new());
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StoreError::store_read(PathBuf::from(&self.name), "search failed"));
        }
        let needle = text.to_lowercase();

        let mut hits = Vec::new();
        for entry in self.pages.iter() {
            for (page, events) in entry.value() {
                hits.extend(events.iter().filter(|e| contains_text(e, &needle)).map(|e| SearchHit {
                    account: e.account().to_string(),
                    target: e.target().clone(),
                    date: *page,
                }));
            }
        }
        trace!(source = %self.name, count = hits.len(), "Searched pages");
        Ok(sorted_hits(hits))
    }
}
