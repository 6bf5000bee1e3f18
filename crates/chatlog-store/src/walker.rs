//! Merging log walker
//!
//! [`LogWalker`] merges the [`LogIter`]s of several stores into one stream,
//! newest first. Each iterator is read ahead in chunks of
//! [`WalkerConfig::fetch_batch`] events. The walker then repeatedly takes
//! the newest buffered head. On equal timestamps the store registered first
//! wins, so the order is the same on every run.
//!
//! Every event taken off a head is recorded in a history together with the
//! store it came from. Rewinding replays that history backwards to work out
//! how far each iterator has to move.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chatlog_core::{Account, Entity, Event, EventMask};
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::config::{DEFAULT_FETCH_BATCH, StoreConfig};
use crate::error::StoreError;
use crate::iter::LogIter;
use crate::source::{LogStore, PageSource};

/// Predicate selecting which events a walker returns
pub type LogEventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Tuning for a [`LogWalker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkerConfig {
    /// Number of events pulled from one iterator at a time (at least 1)
    pub fetch_batch: usize,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            fetch_batch: DEFAULT_FETCH_BATCH,
        }
    }
}

impl From<&StoreConfig> for WalkerConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            fetch_batch: config.fetch_batch,
        }
    }
}

/// One event taken off a head
#[derive(Debug, Clone, Copy)]
struct Consumed {
    source: usize,
    /// Whether the event passed the mask and filter
    emitted: bool,
}

/// Time-ordered merge over the logs of several stores, newest first
pub struct LogWalker<S: PageSource = LogStore> {
    iters: Vec<LogIter<S>>,
    filter: Option<LogEventFilter>,
    mask: EventMask,
    config: WalkerConfig,
    heads: Vec<VecDeque<Event>>,
    exhausted: Vec<bool>,
    history: Vec<Consumed>,
}

impl<S: PageSource> LogWalker<S> {
    /// Create a walker over `stores` with the default configuration
    pub fn new(
        account: &Account,
        target: &Entity,
        mask: EventMask,
        filter: Option<LogEventFilter>,
        stores: Vec<S>,
    ) -> Result<Self, StoreError> {
        Self::with_config(account, target, mask, filter, stores, WalkerConfig::default())
    }

    /// Create a walker over `stores`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] if the target identifier is empty.
    pub fn with_config(
        account: &Account,
        target: &Entity,
        mask: EventMask,
        filter: Option<LogEventFilter>,
        stores: Vec<S>,
        config: WalkerConfig,
    ) -> Result<Self, StoreError> {
        let iters = stores
            .into_iter()
            .map(|store| LogIter::new(store, account.clone(), target.clone(), mask))
            .collect::<Result<Vec<_>, _>>()?;
        let count = iters.len();

        Ok(Self {
            iters,
            filter,
            mask,
            config: WalkerConfig {
                fetch_batch: config.fetch_batch.max(1),
            },
            heads: vec![VecDeque::new(); count],
            exhausted: vec![false; count],
            history: Vec::new(),
        })
    }

    pub fn mask(&self) -> EventMask {
        self.mask
    }

    pub fn config(&self) -> WalkerConfig {
        self.config
    }

    /// Number of stores being merged
    pub fn source_count(&self) -> usize {
        self.iters.len()
    }

    /// Whether every store has been read to the end
    pub fn is_exhausted(&self) -> bool {
        self.heads.iter().all(VecDeque::is_empty) && self.exhausted.iter().all(|e| *e)
    }

    /// Return up to `n` matching events older than those already returned,
    /// newest first
    ///
    /// Events rejected by the mask or the filter are skipped and do not
    /// count toward `n`. A store that fails is logged and treated as having
    /// no more events; the other stores are still merged.
    #[instrument(skip(self), fields(sources = self.iters.len()))]
    pub async fn get_events(&mut self, n: usize) -> Result<Vec<Event>, StoreError> {
        let mut events = Vec::new();
        while events.len() < n {
            self.refill().await;

            let Some(source) = self.newest_head() else {
                debug!(returned = events.len(), "All sources exhausted");
                break;
            };
            let Some(event) = self.heads[source].pop_front() else {
                break;
            };

            let emitted = self.accepts(&event);
            self.history.push(Consumed { source, emitted });
            if emitted {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Move back by `n` previously returned events
    ///
    /// The next [`Self::get_events`] call returns those events again, in the
    /// same order. Rewinding past the first returned event stops there. A
    /// store that fails to rewind is logged and treated as exhausted.
    #[instrument(skip(self), fields(sources = self.iters.len()))]
    pub async fn rewind(&mut self, n: usize) -> Result<(), StoreError> {
        if n == 0 {
            return Ok(());
        }

        let mut counts = vec![0usize; self.iters.len()];
        let mut remaining = n;
        while remaining > 0 {
            let Some(consumed) = self.history.pop() else {
                debug!(requested = n, rewound = n - remaining, "Rewind clamped");
                break;
            };
            counts[consumed.source] += 1;
            if consumed.emitted {
                remaining -= 1;
            }
        }

        for (source, popped) in counts.into_iter().enumerate() {
            let count = popped + self.heads[source].len();
            self.heads[source].clear();
            self.exhausted[source] = false;
            if count == 0 {
                continue;
            }

            trace!(source, count, "Rewinding iterator");
            if let Err(e) = self.iters[source].rewind(count).await {
                warn!(
                    store = %self.iters[source].store().name(),
                    error = %e,
                    "Failed to rewind log store"
                );
                self.exhausted[source] = true;
            }
        }
        Ok(())
    }

    fn accepts(&self, event: &Event) -> bool {
        self.mask.matches(event) && self.filter.as_ref().is_none_or(|filter| filter(event))
    }

    /// Fetch a chunk for every store whose head is empty
    async fn refill(&mut self) {
        let batch = self.config.fetch_batch;
        for source in 0..self.iters.len() {
            if !self.heads[source].is_empty() || self.exhausted[source] {
                continue;
            }

            match self.iters[source].get_events(batch).await {
                Ok(chunk) => {
                    if chunk.len() < batch {
                        self.exhausted[source] = true;
                    }
                    self.heads[source].extend(chunk);
                }
                Err(e) => {
                    warn!(
                        store = %self.iters[source].store().name(),
                        error = %e,
                        "Failed to read log store, skipping it"
                    );
                    self.exhausted[source] = true;
                }
            }
        }
    }

    /// Store holding the newest buffered event, the first one on ties
    fn newest_head(&self) -> Option<usize> {
        let mut newest: Option<(usize, i64)> = None;
        for (source, head) in self.heads.iter().enumerate() {
            let Some(event) = head.front() else {
                continue;
            };
            if newest.is_none_or(|(_, timestamp)| event.timestamp() > timestamp) {
                newest = Some((source, event.timestamp()));
            }
        }
        newest.map(|(source, _)| source)
    }
}

impl<S: PageSource + fmt::Debug> fmt::Debug for LogWalker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogWalker")
            .field("iters", &self.iters)
            .field("mask", &self.mask)
            .field("config", &self.config)
            .field("filtered", &self.filter.is_some())
            .field("exhausted", &self.exhausted)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

/// Cloneable handle to a walker shared between tasks
///
/// Calls are queued in the order they were made and never interleave.
pub struct SharedLogWalker<S: PageSource = LogStore> {
    inner: Arc<Mutex<LogWalker<S>>>,
}

impl<S: PageSource> SharedLogWalker<S> {
    pub fn new(walker: LogWalker<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(walker)),
        }
    }

    /// See [`LogWalker::get_events`]
    pub async fn get_events(&self, n: usize) -> Result<Vec<Event>, StoreError> {
        self.inner.lock().await.get_events(n).await
    }

    /// See [`LogWalker::rewind`]
    pub async fn rewind(&self, n: usize) -> Result<(), StoreError> {
        self.inner.lock().await.rewind(n).await
    }
}

impl<S: PageSource> Clone for SharedLogWalker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PageSource> From<LogWalker<S>> for SharedLogWalker<S> {
    fn from(walker: LogWalker<S>) -> Self {
        Self::new(walker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPageSource;
    use chatlog_core::{CallEndReason, CallEvent, MessageType, TextEvent};

    const TARGET: &str = "user2@collabora.co.uk";
    const BASE: i64 = 1_263_340_800;

    fn text(timestamp: i64, message: &str) -> Event {
        TextEvent {
            timestamp,
            account: "gabble/jabber/me".to_string(),
            target: Entity::contact(TARGET),
            sender: Entity::contact(TARGET),
            receiver: None,
            message: message.to_string(),
            message_type: MessageType::Normal,
            log_id: None,
        }
        .into()
    }

    fn call(timestamp: i64) -> Event {
        CallEvent {
            timestamp,
            account: "gabble/jabber/me".to_string(),
            target: Entity::contact(TARGET),
            sender: Entity::contact(TARGET),
            duration: 1,
            end_actor: Entity::contact(TARGET),
            end_reason: CallEndReason::UserRequested,
            detailed_end_reason: String::new(),
        }
        .into()
    }

    fn label(event: &Event) -> String {
        match event {
            Event::Text(e) => e.message.clone(),
            Event::Call(e) => format!("call@{}", e.timestamp - BASE),
        }
    }

    fn labels(events: &[Event]) -> Vec<String> {
        events.iter().map(label).collect()
    }

    fn walker(
        stores: Vec<InMemoryPageSource>,
        mask: EventMask,
        filter: Option<LogEventFilter>,
        fetch_batch: usize,
    ) -> LogWalker<InMemoryPageSource> {
        LogWalker::with_config(
            &Account::new("gabble/jabber/me").unwrap(),
            &Entity::contact(TARGET),
            mask,
            filter,
            stores,
            WalkerConfig { fetch_batch },
        )
        .unwrap()
    }

    /// Two stores whose events interleave across three days
    fn stores() -> Vec<InMemoryPageSource> {
        let a = InMemoryPageSource::with_events(
            "a",
            vec![
                text(BASE + 1, "a1"),
                text(BASE + 5, "a5"),
                call(BASE + 86_400 + 2),
                text(BASE + 86_400 + 9, "a9"),
                text(BASE + 2 * 86_400, "tie-a"),
            ],
        );
        let b = InMemoryPageSource::with_events(
            "b",
            vec![
                text(BASE + 3, "b3"),
                text(BASE + 86_400 + 4, "b4"),
                call(BASE + 86_400 + 7),
                text(BASE + 2 * 86_400, "tie-b"),
                text(BASE + 2 * 86_400 + 8, "b8"),
            ],
        );
        vec![a, b]
    }

    async fn drain(walker: &mut LogWalker<InMemoryPageSource>) -> Vec<Event> {
        let mut all = Vec::new();
        loop {
            let batch = walker.get_events(3).await.unwrap();
            if batch.is_empty() {
                return all;
            }
            all.extend(batch);
        }
    }

    #[tokio::test]
    async fn test_merge_order_and_ties() {
        let mut walker = walker(stores(), EventMask::ANY, None, 2);
        let all = drain(&mut walker).await;

        assert_eq!(
            labels(&all),
            [
                "b8", "tie-a", "tie-b", "a9", "call@86407", "b4", "call@86402", "a5", "b3", "a1"
            ]
        );
        assert!(all.windows(2).all(|w| w[0].timestamp() >= w[1].timestamp()));
        assert!(walker.is_exhausted());
        assert!(walker.get_events(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mask_excludes_kinds() {
        let mut texts = walker(stores(), EventMask::TEXT, None, 2);
        let all = drain(&mut texts).await;
        assert_eq!(all.len(), 8);
        assert!(all.iter().all(|e| e.as_text().is_some()));

        let mut calls = walker(stores(), EventMask::CALL, None, 2);
        let all = drain(&mut calls).await;
        assert_eq!(labels(&all), ["call@86407", "call@86402"]);
    }

    #[tokio::test]
    async fn test_filter_does_not_count_toward_n() {
        let filter: LogEventFilter =
            Arc::new(|e: &Event| e.as_text().is_some_and(|t| t.message.starts_with('a')));
        let mut walker = walker(stores(), EventMask::ANY, Some(filter), 2);

        assert_eq!(labels(&walker.get_events(2).await.unwrap()), ["a9", "a5"]);
        assert_eq!(labels(&walker.get_events(2).await.unwrap()), ["a1"]);
        assert!(walker.get_events(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rewind_reproduces_events() {
        for fetch_batch in [1, 2, 16] {
            let mut reference = walker(stores(), EventMask::ANY, None, fetch_batch);
            let all = drain(&mut reference).await;

            for j in 0..=all.len() {
                let mut walker = walker(stores(), EventMask::ANY, None, fetch_batch);
                let mut seen = Vec::new();
                for size in [2, 5, 1, 5] {
                    seen.extend(walker.get_events(size).await.unwrap());
                }
                let m = seen.len();
                let j = j.min(m);

                walker.rewind(j).await.unwrap();
                let again = walker.get_events(j).await.unwrap();
                assert_eq!(labels(&again), labels(&seen[m - j..]), "batch {fetch_batch}, rewind {j}");
            }
        }
    }

    #[tokio::test]
    async fn test_rewind_with_filter() {
        let filter: LogEventFilter = Arc::new(|e: &Event| e.as_text().is_some());
        let mut walker = walker(stores(), EventMask::ANY, Some(filter), 3);

        let first = walker.get_events(5).await.unwrap();
        walker.rewind(3).await.unwrap();
        assert_eq!(labels(&walker.get_events(3).await.unwrap()), labels(&first[2..]));
        assert_eq!(labels(&walker.get_events(2).await.unwrap()), ["a5", "b3"]);
    }

    #[tokio::test]
    async fn test_rewind_clamps() {
        let mut walker = walker(stores(), EventMask::ANY, None, 2);
        let first = walker.get_events(4).await.unwrap();

        walker.rewind(100).await.unwrap();
        assert_eq!(labels(&walker.get_events(4).await.unwrap()), labels(&first));
    }

    #[tokio::test]
    async fn test_zero_counts() {
        let stores = stores();
        let mut walker = walker(stores.clone(), EventMask::ANY, None, 2);
        assert!(walker.get_events(0).await.unwrap().is_empty());
        assert_eq!(stores[0].load_count(), 0);

        let first = walker.get_events(2).await.unwrap();
        walker.rewind(0).await.unwrap();
        let next = walker.get_events(1).await.unwrap();
        assert_eq!(labels(&first), ["b8", "tie-a"]);
        assert_eq!(labels(&next), ["tie-b"]);
    }

    #[tokio::test]
    async fn test_failing_store_is_skipped() {
        let stores = stores();
        stores[1].fail_listing(true);
        let mut walker = walker(stores, EventMask::ANY, None, 2);

        let all = drain(&mut walker).await;
        assert_eq!(labels(&all), ["tie-a", "a9", "call@86402", "a5", "a1"]);
    }

    #[tokio::test]
    async fn test_unreadable_older_page_keeps_newer_events() {
        for fetch_batch in [1, 2, 16] {
            let store = InMemoryPageSource::with_events(
                "mem",
                vec![
                    text(BASE + 5, "old"),
                    text(BASE + 86_400 + 3, "e3"),
                    text(BASE + 86_400 + 2, "e2"),
                    text(BASE + 86_400 + 1, "e1"),
                ],
            );
            store.fail_page(chrono::NaiveDate::from_ymd_opt(2010, 1, 13).unwrap());
            let mut walker = walker(vec![store], EventMask::ANY, None, fetch_batch);

            let events = walker.get_events(10).await.unwrap();
            assert_eq!(labels(&events), ["e3", "e2", "e1"], "fetch_batch {fetch_batch}");

            walker.rewind(2).await.unwrap();
            let again = walker.get_events(10).await.unwrap();
            assert_eq!(labels(&again), ["e2", "e1"], "fetch_batch {fetch_batch}");
        }
    }

    #[tokio::test]
    async fn test_no_stores() {
        let mut walker = walker(Vec::new(), EventMask::ANY, None, 2);
        assert!(walker.get_events(3).await.unwrap().is_empty());
        walker.rewind(3).await.unwrap();
        assert!(walker.is_exhausted());
    }

    #[tokio::test]
    async fn test_shared_walker_batches_do_not_interleave() {
        let mut reference = walker(stores(), EventMask::ANY, None, 2);
        let all = labels(&drain(&mut reference).await);

        let shared = SharedLogWalker::new(walker(stores(), EventMask::ANY, None, 2));
        let other = shared.clone();
        let (first, second) = tokio::join!(shared.get_events(4), other.get_events(4));
        let first = labels(&first.unwrap());
        let second = labels(&second.unwrap());

        assert_eq!(first, all[..4].to_vec());
        assert_eq!(second, all[4..8].to_vec());

        shared.rewind(8).await.unwrap();
        assert_eq!(labels(&other.get_events(2).await.unwrap()), all[..2].to_vec());
    }
}
