//! Paged event sources
//!
//! A store splits the log of one (account, target) pair into pages, one per
//! calendar date. [`PageSource`] lists the pages and loads one page at a
//! time; [`crate::LogIter`] builds a lazy cursor on top of it.
//!
//! The set of on-disk formats is fixed, so the concrete stores are joined
//! in the closed [`LogStore`] enum rather than boxed behind the trait.

use async_trait::async_trait;
use chatlog_core::{Account, Entity, Event, EventMask};
use chrono::NaiveDate;

use crate::error::StoreError;
use crate::pidgin::PidginLogStore;
use crate::xml::XmlLogStore;

/// Key of one page of a store: the date its events were logged on
pub type PageKey = NaiveDate;

/// A day of one conversation whose log contains a searched text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchHit {
    /// Account the conversation was logged under, as the store names it
    pub account: String,
    pub target: Entity,
    pub date: PageKey,
}

impl std::fmt::Display for SearchHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.date, self.account, self.target)
    }
}

/// Backend that serves a conversation log one date at a time
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// List the pages holding events for `target`, oldest first
    ///
    /// The list has no duplicates. Stores that cannot hold any event kind
    /// selected by `mask` return an empty list.
    async fn list_pages(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
    ) -> Result<Vec<PageKey>, StoreError>;

    /// Load every event of one page, in stored order
    ///
    /// Only events whose kind is selected by `mask` are returned. A page
    /// that does not exist yields no events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreRead`] if the page is unreadable or corrupt.
    async fn load_page(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
        page: PageKey,
    ) -> Result<Vec<Event>, StoreError>;

    /// Whether the store has any log for `target`
    async fn exists(&self, account: &Account, target: &Entity, mask: EventMask) -> bool;

    /// List the entities the store has logs for under `account`
    async fn list_entities(&self, account: &Account) -> Result<Vec<Entity>, StoreError>;

    /// Find the days, across every account, with a text message containing
    /// `text`
    ///
    /// Matching ignores case. Hits are sorted by account, target and date.
    /// Files that cannot be read are logged and skipped.
    async fn search(&self, text: &str, mask: EventMask) -> Result<Vec<SearchHit>, StoreError>;
}

/// One of the supported on-disk log stores
#[derive(Debug, Clone)]
pub enum LogStore {
    Xml(XmlLogStore),
    Pidgin(PidginLogStore),
}

impl From<XmlLogStore> for LogStore {
    fn from(store: XmlLogStore) -> Self {
        LogStore::Xml(store)
    }
}

impl From<PidginLogStore> for LogStore {
    fn from(store: PidginLogStore) -> Self {
        LogStore::Pidgin(store)
    }
}

#[async_trait]
impl PageSource for LogStore {
    fn name(&self) -> &str {
        match self {
            LogStore::Xml(s) => s.name(),
            LogStore::Pidgin(s) => s.name(),
        }
    }

    async fn list_pages(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
    ) -> Result<Vec<PageKey>, StoreError> {
        match self {
            LogStore::Xml(s) => s.list_pages(account, target, mask).await,
            LogStore::Pidgin(s) => s.list_pages(account, target, mask).await,
        }
    }

    async fn load_page(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
        page: PageKey,
    ) -> Result<Vec<Event>, StoreError> {
        match self {
            LogStore::Xml(s) => s.load_page(account, target, mask, page).await,
            LogStore::Pidgin(s) => s.load_page(account, target, mask, page).await,
        }
    }

    async fn exists(&self, account: &Account, target: &Entity, mask: EventMask) -> bool {
        match self {
            LogStore::Xml(s) => s.exists(account, target, mask).await,
            LogStore::Pidgin(s) => s.exists(account, target, mask).await,
        }
    }

    async fn list_entities(&self, account: &Account) -> Result<Vec<Entity>, StoreError> {
        match self {
            LogStore::Xml(s) => s.list_entities(account).await,
            LogStore::Pidgin(s) => s.list_entities(account).await,
        }
    }

    async fn search(&self, text: &str, mask: EventMask) -> Result<Vec<SearchHit>, StoreError> {
        match self {
            LogStore::Xml(s) => s.search(text, mask).await,
            LogStore::Pidgin(s) => s.search(text, mask).await,
        }
    }
}

/// Whether `event` is a text message containing `needle`, which must
/// already be lowercase
pub(crate) fn contains_text(event: &Event, needle: &str) -> bool {
    event
        .as_text()
        .is_some_and(|text| text.message.to_lowercase().contains(needle))
}

/// Sort hits by account, target and date, dropping duplicates
pub(crate) fn sorted_hits(mut hits: Vec<SearchHit>) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        a.account
            .cmp(&b.account)
            .then_with(|| a.target.identifier().cmp(b.target.identifier()))
            .then_with(|| a.target.is_room().cmp(&b.target.is_room()))
            .then_with(|| a.date.cmp(&b.date))
    });
    hits.dedup();
    hits
}

/// Sorted, duplicate-free list of the date keys collected from a directory
pub(crate) fn sorted_pages(mut pages: Vec<PageKey>) -> Vec<PageKey> {
    pages.sort_unstable();
    pages.dedup();
    pages
}

/// Read a directory, treating a missing directory as empty
pub(crate) async fn read_dir_names(dir: &std::path::Path) -> Result<Vec<String>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "Could not open directory");
            return Ok(Vec::new());
        }
        Err(e) => return Err(StoreError::store_read(dir, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::store_read(dir, e))?
    {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// List the sub-directory names of `dir`, treating a missing directory as empty
pub(crate) async fn read_subdir_names(dir: &std::path::Path) -> Result<Vec<String>, StoreError> {
    let mut dirs = Vec::new();
    for name in read_dir_names(dir).await? {
        let is_dir = tokio::fs::metadata(dir.join(&name))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if is_dir {
            dirs.push(name);
        }
    }
    Ok(dirs)
}
