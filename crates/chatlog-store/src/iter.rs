//! Single-source log iterator
//!
//! [`LogIter`] walks the log of one conversation in one store backwards in
//! time. Pages are listed once, on first use, and loaded one at a time as
//! the cursor reaches them. Only the current page is kept in memory.

use std::sync::Arc;

use chatlog_core::{Account, Entity, Event, EventMask};
use tracing::{debug, instrument, trace, warn};

use crate::error::StoreError;
use crate::source::{LogStore, PageKey, PageSource, sorted_pages};

/// Position of a [`LogIter`] within its store
///
/// Cloning is cheap, so a cursor can be snapshotted before an operation
/// that may fail halfway.
#[derive(Debug, Clone, Default)]
struct Cursor {
    /// Page list, ascending; `None` until first listed
    pages: Option<Arc<[PageKey]>>,
    /// Next older page to load
    next_page: Option<usize>,
    /// Page whose events are cached
    current_page: Option<usize>,
    /// Events of the current page, ascending by timestamp
    events: Arc<[Event]>,
    /// Next event to return from the current page
    next_event: Option<usize>,
}

impl Cursor {
    fn page_count(&self) -> usize {
        self.pages.as_ref().map_or(0, |pages| pages.len())
    }

    /// Index of the most recently returned event of the current page
    fn last_returned(&self) -> Option<usize> {
        self.current_page?;
        let last = match self.next_event {
            Some(i) => i + 1,
            None => 0,
        };
        (last < self.events.len()).then_some(last)
    }

    fn is_exhausted(&self) -> bool {
        self.pages.is_some() && self.next_page.is_none() && self.next_event.is_none()
    }
}

/// Rewindable cursor over one store's log of a conversation, newest first
#[derive(Debug)]
pub struct LogIter<S: PageSource = LogStore> {
    store: S,
    account: Account,
    target: Entity,
    mask: EventMask,
    cursor: Cursor,
}

impl<S: PageSource> LogIter<S> {
    /// Create an iterator over the events `store` holds for `target`
    ///
    /// No I/O happens until the first call to [`Self::get_events`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] if the target identifier is empty.
    pub fn new(
        store: S,
        account: Account,
        target: Entity,
        mask: EventMask,
    ) -> Result<Self, StoreError> {
        if target.identifier().is_empty() {
            return Err(StoreError::invalid_argument("target identifier is empty"));
        }
        Ok(Self {
            store,
            account,
            target,
            mask,
            cursor: Cursor::default(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn target(&self) -> &Entity {
        &self.target
    }

    pub fn mask(&self) -> EventMask {
        self.mask
    }

    /// Whether every event has been returned
    ///
    /// Always false before the first fetch.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_exhausted()
    }

    /// Return up to `n` events older than those already returned, newest first
    ///
    /// A result shorter than `n` means the store has no more events, or
    /// that the next page could not be loaded. Events read before an
    /// unreadable page are returned and the cursor stops in front of it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreRead`] if the page list, or the first page
    /// this call needs, cannot be loaded. The cursor is left where it was
    /// before the call.
    #[instrument(skip(self), fields(store = %self.store.name(), target = %self.target.identifier()))]
    pub async fn get_events(&mut self, n: usize) -> Result<Vec<Event>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let snapshot = self.cursor.clone();
        let result = self.collect_events(n).await;
        if result.is_err() {
            self.cursor = snapshot;
        }
        result
    }

    /// Move the cursor back by `n` previously returned events
    ///
    /// The next [`Self::get_events`] call then returns those events again.
    /// Rewinding past the newest event stops there.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreRead`] if a newer page cannot be reloaded.
    /// The cursor is left where it was before the call.
    #[instrument(skip(self), fields(store = %self.store.name(), target = %self.target.identifier()))]
    pub async fn rewind(&mut self, n: usize) -> Result<(), StoreError> {
        if n == 0 {
            return Ok(());
        }

        let snapshot = self.cursor.clone();
        let result = self.rewind_cursor(n).await;
        if result.is_err() {
            self.cursor = snapshot;
        }
        result
    }

    async fn collect_events(&mut self, n: usize) -> Result<Vec<Event>, StoreError> {
        self.ensure_pages().await?;

        let mut events = Vec::new();
        while events.len() < n {
            match self.cursor.next_event {
                Some(i) => {
                    events.push(self.cursor.events[i].clone());
                    self.cursor.next_event = i.checked_sub(1);
                }
                None => {
                    let Some(page) = self.cursor.next_page else {
                        trace!("No more pages");
                        break;
                    };
                    if let Err(e) = self.load(page).await {
                        if events.is_empty() {
                            return Err(e);
                        }
                        // Hand back what was read; the next call reports the error
                        warn!(error = %e, returned = events.len(), "Stopping before unreadable page");
                        break;
                    }
                    self.cursor.next_event = self.cursor.events.len().checked_sub(1);
                    self.cursor.next_page = page.checked_sub(1);
                }
            }
        }
        Ok(events)
    }

    async fn rewind_cursor(&mut self, n: usize) -> Result<(), StoreError> {
        let page_count = self.cursor.page_count();
        let mut last = self.cursor.last_returned();
        let mut rewound = 0;

        while rewound < n {
            let Some(i) = last else {
                // Every event of the current page is unread again: step to the
                // newer page, whose oldest event was returned last
                let Some(page) = self.cursor.current_page else {
                    break;
                };
                self.cursor.events = Arc::from(Vec::new());
                self.cursor.current_page = None;
                self.cursor.next_event = None;
                self.cursor.next_page = Some(page);

                let newer = page + 1;
                if newer >= page_count {
                    debug!(rewound, requested = n, "Rewind clamped at newest event");
                    break;
                }
                self.load(newer).await?;
                last = (!self.cursor.events.is_empty()).then_some(0);
                continue;
            };

            self.cursor.next_event = Some(i);
            last = (i + 1 < self.cursor.events.len()).then_some(i + 1);
            rewound += 1;
        }
        Ok(())
    }

    /// List the store's pages once
    async fn ensure_pages(&mut self) -> Result<(), StoreError> {
        if self.cursor.pages.is_some() {
            return Ok(());
        }
        let pages = self
            .store
            .list_pages(&self.account, &self.target, self.mask)
            .await?;
        let pages = sorted_pages(pages);
        debug!(count = pages.len(), "Listed pages");
        self.cursor.next_page = pages.len().checked_sub(1);
        self.cursor.pages = Some(pages.into());
        Ok(())
    }

    /// Load page `index` into the cursor, sorted ascending by timestamp
    async fn load(&mut self, index: usize) -> Result<(), StoreError> {
        let Some(page) = self.cursor.pages.as_ref().and_then(|p| p.get(index).copied()) else {
            return Err(StoreError::invalid_argument(format!(
                "page index {} out of range",
                index
            )));
        };
        let mut events = self
            .store
            .load_page(&self.account, &self.target, self.mask, page)
            .await?;
        events.sort_by_key(Event::timestamp);
        trace!(%page, count = events.len(), "Loaded page");

        self.cursor.events = events.into();
        self.cursor.current_page = Some(index);
        Ok(())
    }
}
