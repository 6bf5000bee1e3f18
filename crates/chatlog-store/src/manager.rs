//! Log manager
//!
//! [`LogManager`] owns the set of stores configured for this process and
//! answers queries across all of them. Callers create one from a
//! [`StoreConfig`] and pass it where it is needed.

use std::collections::HashSet;

use chatlog_core::{Account, Entity, Event, EventMask};
use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::pidgin::PidginLogStore;
use crate::source::{LogStore, PageSource, SearchHit, sorted_pages};
use crate::walker::{LogEventFilter, LogWalker, WalkerConfig};
use crate::xml::XmlLogStore;

/// Entry point for reading logs across every configured store
#[derive(Debug, Clone)]
pub struct LogManager<S: PageSource = LogStore> {
    stores: Vec<S>,
    walker_config: WalkerConfig,
}

impl LogManager<LogStore> {
    /// Create a manager reading the stores named in `config`
    pub fn new(config: StoreConfig) -> Self {
        let mut stores = Vec::new();
        if let Some(dir) = &config.xml_dir {
            stores.push(LogStore::from(XmlLogStore::new(dir)));
        }
        if let Some(dir) = &config.pidgin_dir {
            stores.push(LogStore::from(PidginLogStore::new(dir)));
        }
        info!(
            stores = stores.len(),
            fetch_batch = config.fetch_batch,
            "Log manager ready"
        );

        Self {
            stores,
            walker_config: WalkerConfig::from(&config),
        }
    }
}

impl<S: PageSource + Clone> LogManager<S> {
    /// Create a manager over an explicit set of stores
    pub fn with_stores(stores: Vec<S>) -> Self {
        Self {
            stores,
            walker_config: WalkerConfig::default(),
        }
    }

    /// Set the configuration of the walkers this manager creates
    pub fn with_walker_config(mut self, walker_config: WalkerConfig) -> Self {
        self.walker_config = walker_config;
        self
    }

    pub fn stores(&self) -> &[S] {
        &self.stores
    }

    /// Whether any store has logs for `target`
    pub async fn exists(&self, account: &Account, target: &Entity, mask: EventMask) -> bool {
        for store in &self.stores {
            if store.exists(account, target, mask).await {
                return true;
            }
        }
        false
    }

    /// Dates with logs for `target`, ascending and without duplicates
    ///
    /// Stores that cannot be listed are logged and skipped.
    #[instrument(skip_all, fields(target = %target.identifier()))]
    pub async fn get_dates(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        check_target(target)?;

        let mut dates = Vec::new();
        for store in &self.stores {
            match store.list_pages(account, target, mask).await {
                Ok(pages) => dates.extend(pages),
                Err(e) => warn!(store = %store.name(), error = %e, "Failed to list dates"),
            }
        }
        Ok(sorted_pages(dates))
    }

    /// Events logged for `target` on `date`, oldest first
    ///
    /// Events from different stores are merged by timestamp. Equal
    /// timestamps keep store order. Stores that cannot be read are logged
    /// and skipped.
    #[instrument(skip_all, fields(target = %target.identifier(), %date))]
    pub async fn get_events_for_date(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
        date: NaiveDate,
    ) -> Result<Vec<Event>, StoreError> {
        check_target(target)?;

        let mut events = Vec::new();
        for store in &self.stores {
            match store.load_page(account, target, mask, date).await {
                Ok(page) => events.extend(page),
                Err(e) => warn!(store = %store.name(), error = %e, "Failed to read events"),
            }
        }
        events.sort_by_key(Event::timestamp);
        Ok(events)
    }

    /// The latest `n` events accepted by `mask` and `filter`, oldest first
    #[instrument(skip(self, account, target, filter), fields(target = %target.identifier()))]
    pub async fn get_filtered_events(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
        n: usize,
        filter: Option<LogEventFilter>,
    ) -> Result<Vec<Event>, StoreError> {
        let mut walker = self.walk_filtered_events(account, target, mask, filter).await?;
        let mut events = walker.get_events(n).await?;
        events.reverse();
        debug!(count = events.len(), "Collected filtered events");
        Ok(events)
    }

    /// Entities with logs under `account` in any store
    ///
    /// The first store reporting an entity decides its position in the list.
    pub async fn get_entities(&self, account: &Account) -> Result<Vec<Entity>, StoreError> {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for store in &self.stores {
            match store.list_entities(account).await {
                Ok(found) => {
                    for entity in found {
                        if seen.insert(entity.clone()) {
                            entities.push(entity);
                        }
                    }
                }
                Err(e) => warn!(store = %store.name(), error = %e, "Failed to list entities"),
            }
        }
        Ok(entities)
    }

    /// Days of any conversation whose text messages contain `text`
    ///
    /// Matching ignores case. Hits keep store order, and a hit reported
    /// by an earlier store is not repeated. Stores that cannot be searched
    /// are logged and skipped.
    #[instrument(skip(self))]
    pub async fn search(&self, text: &str, mask: EventMask) -> Result<Vec<SearchHit>, StoreError> {
        if text.is_empty() {
            return Err(StoreError::invalid_argument("search text is empty"));
        }

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for store in &self.stores {
            match store.search(text, mask).await {
                Ok(found) => hits.extend(found.into_iter().filter(|hit| seen.insert(hit.clone()))),
                Err(e) => warn!(store = %store.name(), error = %e, "Failed to search"),
            }
        }
        debug!(count = hits.len(), "Search finished");
        Ok(hits)
    }

    /// Create a walker over the stores holding logs for `target`
    pub async fn walk_filtered_events(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
        filter: Option<LogEventFilter>,
    ) -> Result<LogWalker<S>, StoreError> {
        check_target(target)?;

        let mut stores = Vec::new();
        for store in &self.stores {
            if store.exists(account, target, mask).await {
                stores.push(store.clone());
            }
        }
        debug!(
            target = %target.identifier(),
            stores = stores.len(),
            "Creating log walker"
        );

        LogWalker::with_config(account, target, mask, filter, stores, self.walker_config)
    }
}

fn check_target(target: &Entity) -> Result<(), StoreError> {
    if target.identifier().is_empty() {
        return Err(StoreError::invalid_argument("target identifier is empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPageSource;
    use chatlog_core::{MessageType, TextEvent};
    use std::sync::Arc;

    const BASE: i64 = 1_263_340_800;

    fn text(target: &str, timestamp: i64, message: &str) -> Event {
        TextEvent {
            timestamp,
            account: "gabble/jabber/me".to_string(),
            target: Entity::contact(target),
            sender: Entity::contact(target),
            receiver: None,
            message: message.to_string(),
            message_type: MessageType::Normal,
            log_id: None,
        }
        .into()
    }

    fn account() -> Account {
        Account::new("gabble/jabber/me").unwrap()
    }

    fn manager() -> LogManager<InMemoryPageSource> {
        LogManager::with_stores(vec![
            InMemoryPageSource::with_events(
                "first",
                vec![
                    text("alice", BASE + 10, "one"),
                    text("alice", BASE + 30, "three"),
                    text("alice", BASE + 86_400, "next day"),
                ],
            ),
            InMemoryPageSource::with_events(
                "second",
                vec![
                    text("alice", BASE + 10, "one again"),
                    text("alice", BASE + 20, "two"),
                    text("bob", BASE + 2 * 86_400, "hi bob"),
                ],
            ),
        ])
    }

    fn messages(events: &[Event]) -> Vec<&str> {
        events
            .iter()
            .map(|e| e.as_text().unwrap().message.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_get_dates_union() {
        let manager = manager();
        let alice = Entity::contact("alice");
        let dates = manager.get_dates(&account(), &alice, EventMask::ANY).await.unwrap();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2010, 1, 13).unwrap(),
                NaiveDate::from_ymd_opt(2010, 1, 14).unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_events_for_date_merges_stores() {
        let manager = manager();
        let events = manager
            .get_events_for_date(
                &account(),
                &Entity::contact("alice"),
                EventMask::ANY,
                NaiveDate::from_ymd_opt(2010, 1, 13).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(messages(&events), ["one", "one again", "two", "three"]);
    }

    #[tokio::test]
    async fn test_unreadable_store_is_skipped() {
        let manager = manager();
        let day = NaiveDate::from_ymd_opt(2010, 1, 13).unwrap();
        manager.stores()[0].fail_page(day);

        let events = manager
            .get_events_for_date(&account(), &Entity::contact("alice"), EventMask::ANY, day)
            .await
            .unwrap();
        assert_eq!(messages(&events), ["one again", "two"]);
    }

    #[tokio::test]
    async fn test_get_filtered_events_oldest_first() {
        let manager = manager();
        let filter: LogEventFilter =
            Arc::new(|e: &Event| e.as_text().is_some_and(|t| !t.message.starts_with('t')));

        let events = manager
            .get_filtered_events(&account(), &Entity::contact("alice"), EventMask::ANY, 3, Some(filter))
            .await
            .unwrap();
        assert_eq!(messages(&events), ["one again", "one", "next day"]);
    }

    #[tokio::test]
    async fn test_walker_only_uses_existing_stores() {
        let manager = manager();
        let walker = manager
            .walk_filtered_events(&account(), &Entity::contact("bob"), EventMask::ANY, None)
            .await
            .unwrap();
        assert_eq!(walker.source_count(), 1);

        assert!(manager.exists(&account(), &Entity::contact("bob"), EventMask::ANY).await);
        assert!(!manager.exists(&account(), &Entity::contact("carol"), EventMask::ANY).await);
    }

    #[tokio::test]
    async fn test_get_entities_dedups() {
        let manager = manager();
        let entities = manager.get_entities(&account()).await.unwrap();
        assert_eq!(entities, vec![Entity::contact("alice"), Entity::contact("bob")]);
    }

    #[tokio::test]
    async fn test_search_across_stores() {
        let manager = manager();
        let day = |d| NaiveDate::from_ymd_opt(2010, 1, d).unwrap();

        // Both stores log "one" for alice on the 13th
        let hits = manager.search("ONE", EventMask::ANY).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target, Entity::contact("alice"));
        assert_eq!(hits[0].date, day(13));

        let hits = manager.search("O", EventMask::TEXT).await.unwrap();
        let found: Vec<_> = hits.iter().map(|h| (h.target.identifier(), h.date)).collect();
        assert_eq!(found, [("alice", day(13)), ("bob", day(15))]);

        assert!(manager.search("one", EventMask::CALL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_skips_failing_store() {
        let manager = manager();
        manager.stores()[0].fail_listing(true);
        assert_eq!(manager.search("one", EventMask::ANY).await.unwrap().len(), 1);
        assert!(manager.search("three", EventMask::ANY).await.unwrap().is_empty());

        let err = manager.search("", EventMask::ANY).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_empty_target_rejected() {
        let manager = manager();
        let err = manager
            .get_dates(&account(), &Entity::contact(""), EventMask::ANY)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }
}
