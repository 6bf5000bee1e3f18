//! XML log store reader
//!
//! The XML store keeps one file per day and per conversation:
//!
//! ```text
//! <basedir>/<account>/<target>/YYYYMMDD.log
//! <basedir>/<account>/chatrooms/<room>/YYYYMMDD.log
//! ```
//!
//! where `<account>` is the account identifier with `/` replaced by `_`.
//! Each file holds a `<log>` element whose children are the events of that
//! day:
//!
//! ```text
//! <log>
//! <message time='20100113T17:48:01' id='user4@collabora.co.uk' name='User4'
//!          token='' isuser='false' type='normal'>hello &apos;you&apos;</message>
//! <call time='20100113T17:48:01' id='user4@collabora.co.uk' name='User4'
//!       isuser='false' token='' duration='1' actor='user4@collabora.co.uk'
//!       actortype='contact' actorname='User4' actortoken=''
//!       reason='user-requested' detail=''/>
//! </log>
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chatlog_core::{
    Account, CallEndReason, CallEvent, Entity, EntityType, Event, EventMask, MessageType,
    TextEvent,
};
use chrono::{NaiveDate, NaiveDateTime};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::reader::Reader;
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::source::{
    PageKey, PageSource, SearchHit, contains_text, read_dir_names, read_subdir_names, sorted_hits,
    sorted_pages,
};

/// Sub-directory holding chat room logs
pub const LOG_DIR_CHATROOMS: &str = "chatrooms";
/// Suffix of every log file
pub const LOG_FILENAME_SUFFIX: &str = ".log";

const LOG_TIME_FORMAT_FULL: &str = "%Y%m%dT%H:%M:%S";
const LOG_TIME_FORMAT: &str = "%Y%m%d";

/// Reader for the XML log store
#[derive(Debug, Clone)]
pub struct XmlLogStore {
    name: String,
    basedir: PathBuf,
}

impl XmlLogStore {
    /// Create a reader for the store rooted at `basedir`
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            name: "TpLogger".to_string(),
            basedir: basedir.into(),
        }
    }

    /// Override the name used in logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    fn account_dir(&self, account: &Account) -> PathBuf {
        self.basedir.join(account.id().replace('/', "_"))
    }

    /// Directory holding the logs for `target`
    pub fn target_dir(&self, account: &Account, target: &Entity) -> PathBuf {
        // A 1-1 conversation started from a room has an id like
        // room@conference.example.com/Alias, which must not become a sub-directory
        let escaped = target.identifier().replace('/', "_");
        let account_dir = self.account_dir(account);
        if target.is_room() {
            account_dir.join(LOG_DIR_CHATROOMS).join(escaped)
        } else {
            account_dir.join(escaped)
        }
    }

    /// Days in the log directory `dir` with a text message containing `needle`
    async fn search_dir(
        &self,
        account_name: &str,
        target: &Entity,
        dir: &Path,
        needle: &str,
    ) -> Result<Vec<SearchHit>, StoreError> {
        // Parsing only needs an account to stamp on the events
        let account = Account::new(account_name)?;
        let mut hits = Vec::new();

        for name in read_dir_names(dir).await? {
            let Some(date) = name
                .strip_suffix(LOG_FILENAME_SUFFIX)
                .filter(|stem| stem.len() == 8)
                .and_then(|stem| NaiveDate::parse_from_str(stem, LOG_TIME_FORMAT).ok())
            else {
                continue;
            };

            let path = dir.join(&name);
            let events = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => parse_log(&contents, &account, target),
                Err(e) => Err(e.to_string()),
            };
            match events {
                Ok(events) if events.iter().any(|e| contains_text(e, needle)) => {
                    debug!(path = %path.display(), "Found text");
                    hits.push(SearchHit {
                        account: account_name.to_string(),
                        target: target.clone(),
                        date,
                    });
                }
                Ok(_) => {}
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "Skipping unreadable log file")
                }
            }
        }
        Ok(hits)
    }

    /// Path of the log file for one date
    pub fn page_path(&self, account: &Account, target: &Entity, page: PageKey) -> PathBuf {
        self.target_dir(account, target).join(format!(
            "{}{}",
            page.format(LOG_TIME_FORMAT),
            LOG_FILENAME_SUFFIX
        ))
    }
}

#[async_trait]
impl PageSource for XmlLogStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(store = %self.name, target = %target.identifier()))]
    async fn list_pages(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
    ) -> Result<Vec<PageKey>, StoreError> {
        if !mask.intersects(EventMask::TEXT | EventMask::CALL) {
            return Ok(Vec::new());
        }

        let dir = self.target_dir(account, target);
        debug!(dir = %dir.display(), "Collating a list of dates");

        let pages: Vec<PageKey> = read_dir_names(&dir)
            .await?
            .iter()
            .filter_map(|name| name.strip_suffix(LOG_FILENAME_SUFFIX))
            .filter(|stem| stem.len() == 8)
            .filter_map(|stem| NaiveDate::parse_from_str(stem, LOG_TIME_FORMAT).ok())
            .collect();

        let pages = sorted_pages(pages);
        debug!(count = pages.len(), "Parsed dates");
        Ok(pages)
    }

    #[instrument(skip_all, fields(store = %self.name, %page))]
    async fn load_page(
        &self,
        account: &Account,
        target: &Entity,
        mask: EventMask,
        page: PageKey,
    ) -> Result<Vec<Event>, StoreError> {
        let path = self.page_path(account, target, page);
        debug!(path = %path.display(), "Attempting to parse log file");

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Log file does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::store_read(&path, e)),
        };

        let events = parse_log(&contents, account, target)
            .map_err(|reason| StoreError::store_read(&path, reason))?;

        let events: Vec<Event> = events.into_iter().filter(|e| mask.matches(e)).collect();
        debug!(count = events.len(), "Parsed events");
        Ok(events)
    }

    async fn exists(&self, account: &Account, target: &Entity, mask: EventMask) -> bool {
        if !mask.intersects(EventMask::TEXT | EventMask::CALL) {
            return false;
        }
        tokio::fs::metadata(self.target_dir(account, target))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn list_entities(&self, account: &Account) -> Result<Vec<Entity>, StoreError> {
        let account_dir = self.account_dir(account);
        let mut entities: Vec<Entity> = read_subdir_names(&account_dir)
            .await?
            .into_iter()
            .filter(|name| name != LOG_DIR_CHATROOMS)
            .map(Entity::contact)
            .collect();

        let rooms = read_subdir_names(&account_dir.join(LOG_DIR_CHATROOMS)).await?;
        entities.extend(rooms.into_iter().map(Entity::room));
        Ok(entities)
    }

    #[instrument(skip_all, fields(store = %self.name, text = %text))]
    async fn search(&self, text: &str, mask: EventMask) -> Result<Vec<SearchHit>, StoreError> {
        if text.is_empty() || !mask.intersects(EventMask::TEXT) {
            return Ok(Vec::new());
        }
        let needle = text.to_lowercase();

        let mut hits = Vec::new();
        for account_name in read_subdir_names(&self.basedir).await? {
            let account_dir = self.basedir.join(&account_name);
            for name in read_subdir_names(&account_dir).await? {
                if name == LOG_DIR_CHATROOMS {
                    let rooms_dir = account_dir.join(LOG_DIR_CHATROOMS);
                    for room in read_subdir_names(&rooms_dir).await? {
                        let dir = rooms_dir.join(&room);
                        hits.extend(
                            self.search_dir(&account_name, &Entity::room(room), &dir, &needle)
                                .await?,
                        );
                    }
                } else {
                    let dir = account_dir.join(&name);
                    hits.extend(
                        self.search_dir(&account_name, &Entity::contact(name), &dir, &needle)
                            .await?,
                    );
                }
            }
        }

        debug!(count = hits.len(), "Search finished");
        Ok(sorted_hits(hits))
    }
}

/// Parse the events of one log file
///
/// Entries with an unparsable timestamp are skipped. A file without a
/// `<log>` root, or one that ends before the root is closed, is an error.
fn parse_log(contents: &str, account: &Account, target: &Entity) -> Result<Vec<Event>, String> {
    let mut reader = Reader::from_str(contents);
    let mut events = Vec::new();
    let mut in_log = false;
    let mut seen_log = false;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            XmlEvent::Start(e) if e.name().as_ref() == b"log" => {
                in_log = true;
                seen_log = true;
            }
            XmlEvent::End(e) if e.name().as_ref() == b"log" => {
                in_log = false;
            }
            XmlEvent::Start(e) if in_log && e.name().as_ref() == b"message" => {
                let attrs = attributes(&e)?;
                let raw = reader.read_text(e.name()).map_err(|e| e.to_string())?;
                let body = quick_xml::escape::unescape(&raw).map_err(|e| e.to_string())?;
                events.extend(text_event(&attrs, &body, account, target));
            }
            XmlEvent::Empty(e) if in_log && e.name().as_ref() == b"message" => {
                let attrs = attributes(&e)?;
                events.extend(text_event(&attrs, "", account, target));
            }
            XmlEvent::Start(e) if in_log && e.name().as_ref() == b"call" => {
                let attrs = attributes(&e)?;
                reader.read_to_end(e.name()).map_err(|e| e.to_string())?;
                events.extend(call_event(&attrs, account, target));
            }
            XmlEvent::Empty(e) if in_log && e.name().as_ref() == b"call" => {
                let attrs = attributes(&e)?;
                events.extend(call_event(&attrs, account, target));
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    if !seen_log {
        return Err("missing <log> root element".to_string());
    }
    if in_log {
        return Err("unexpected end of file inside <log>".to_string());
    }
    Ok(events)
}

fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>, String> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

fn attr<'a>(attrs: &'a HashMap<String, String>, key: &str) -> Cow<'a, str> {
    attrs
        .get(key)
        .map(|v| Cow::Borrowed(v.as_str()))
        .unwrap_or(Cow::Borrowed(""))
}

fn non_empty(attrs: &HashMap<String, String>, key: &str) -> Option<String> {
    attrs.get(key).filter(|v| !v.is_empty()).cloned()
}

/// Parse a timestamp as stored in the `time` attribute
///
/// Accepts `YYYYMMDDTHH:MM:SS` and `YYYYMMDD` (both UTC) as well as plain
/// unix seconds.
pub(crate) fn parse_log_time(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, LOG_TIME_FORMAT)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp());
    }
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return value.parse().ok();
    }
    NaiveDateTime::parse_from_str(value, LOG_TIME_FORMAT_FULL)
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

fn sender(attrs: &HashMap<String, String>) -> Entity {
    let entity_type = if attr(attrs, "isuser") == "true" {
        EntityType::SelfContact
    } else {
        EntityType::Contact
    };
    Entity::new(
        attr(attrs, "id").into_owned(),
        entity_type,
        non_empty(attrs, "name"),
        non_empty(attrs, "token"),
    )
}

fn text_event(
    attrs: &HashMap<String, String>,
    body: &str,
    account: &Account,
    target: &Entity,
) -> Option<Event> {
    let Some(timestamp) = parse_log_time(&attr(attrs, "time")) else {
        warn!(time = %attr(attrs, "time"), "Skipping message with invalid timestamp");
        return None;
    };

    Some(
        TextEvent {
            timestamp,
            account: account.id().to_string(),
            target: target.clone(),
            sender: sender(attrs),
            receiver: None,
            message: body.to_string(),
            message_type: MessageType::from_log_str(&attr(attrs, "type")),
            log_id: non_empty(attrs, "cm_id"),
        }
        .into(),
    )
}

fn call_event(attrs: &HashMap<String, String>, account: &Account, target: &Entity) -> Option<Event> {
    let Some(timestamp) = parse_log_time(&attr(attrs, "time")) else {
        warn!(time = %attr(attrs, "time"), "Skipping call with invalid timestamp");
        return None;
    };

    let end_actor = Entity::new(
        attr(attrs, "actor").into_owned(),
        attr(attrs, "actortype").parse().unwrap_or_default(),
        non_empty(attrs, "actorname"),
        non_empty(attrs, "actortoken"),
    );

    Some(
        CallEvent {
            timestamp,
            account: account.id().to_string(),
            target: target.clone(),
            sender: sender(attrs),
            duration: attr(attrs, "duration").trim().parse().unwrap_or(0),
            end_actor,
            end_reason: CallEndReason::from_log_str(&attr(attrs, "reason")),
            detailed_end_reason: attr(attrs, "detail").into_owned(),
        }
        .into(),
    )
}
