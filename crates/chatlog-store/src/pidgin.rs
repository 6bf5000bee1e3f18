//! Pidgin transcript reader
//!
//! Pidgin writes plain-text or HTML transcripts, one file per conversation
//! session:
//!
//! ```text
//! <basedir>/<protocol>/<username>/<target>/2010-01-13.174801+0000GMT.txt
//! <basedir>/<protocol>/<username>/<room>.chat/2010-01-13.174801+0000GMT.html
//! ```
//!
//! A date may hold several sessions. All of them form one page.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use chatlog_core::{Account, Entity, EntityType, Event, EventMask, MessageType, TextEvent};
use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use tracing::{debug, instrument, trace, warn};
use unicode_normalization::UnicodeNormalization;

use crate::error::StoreError;
use crate::source::{
    PageKey, PageSource, SearchHit, contains_text, read_dir_names, read_subdir_names, sorted_hits,
    sorted_pages,
};

pub const TXT_LOG_FILENAME_SUFFIX: &str = ".txt";
pub const HTML_LOG_FILENAME_SUFFIX: &str = ".html";
/// Suffix Pidgin appends to chat room directories
pub const ROOM_DIR_SUFFIX: &str = ".chat";

const SYSTEM_DIR: &str = ".system";
/// Colour Pidgin uses for the local user in HTML transcripts
const SELF_COLOUR: &str = "16569E";

static TXT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Conversation with (.+) at (.+) on (.+) \((.+)\)").expect("valid header regex")
});

static HTML_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<h3>Conversation with (.+) at (.+) on (.+) \((.+)\)</h3>")
        .expect("valid header regex")
});

static TXT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((.+)\) (.+): (.+)").expect("valid line regex"));

static HTML_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?U)<font size="2">\((.+)\)</font> <b>(.+):</b></font> (<body>|)(.*)(</body>|)<br/>$"#,
    )
    .expect("valid line regex")
});

/// Reader for a Pidgin log directory
#[derive(Debug, Clone)]
pub struct PidginLogStore {
    name: String,
    basedir: PathBuf,
}

impl PidginLogStore {
    /// Create a reader for the transcripts under `basedir`
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            name: "Pidgin".to_string(),
            basedir: basedir.into(),
        }
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    /// Directory holding every conversation of `account`
    ///
    /// Fails with [`StoreError::InvalidArgument`] if the account lacks the
    /// protocol or the `account` parameter.
    pub fn account_dir(&self, account: &Account) -> Result<PathBuf, StoreError> {
        let protocol = account.protocol().ok_or_else(|| {
            StoreError::invalid_argument(format!("account {} has no protocol", account.id()))
        })?;
        let user = account.parameter("account").ok_or_else(|| {
            StoreError::invalid_argument(format!(
                "account {} has no account parameter",
                account.id()
            ))
        })?;

        let username = match (protocol, account.parameter("server")) {
            ("irc", Some(server)) => format!("{}@{}", user, server),
            _ => user.to_string(),
        };

        let normalized: String = username.nfd().collect();
        Ok(self.basedir.join(protocol).join(escape_username(&normalized)))
    }

    /// Directory holding the transcripts for `target`
    pub fn target_dir(&self, account: &Account, target: &Entity) -> Result<PathBuf, StoreError> {
        let id = target.identifier();
        let dir = if target.is_room() {
            format!("{}{}", id, ROOM_DIR_SUFFIX)
        } else {
            id.strip_suffix("#1").unwrap_or(id).to_string()
        };
        Ok(self.account_dir(account)?.join(dir))
    }

    /// Days in the transcript directory `dir` with a message containing `needle`
    async fn search_dir(
        &self,
        account_name: &str,
        target: &Entity,
        dir: &Path,
        needle: &str,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let account = Account::new(account_name)?;
        let mut hits = Vec::new();

        for name in read_dir_names(dir).await? {
            let Some(date) = file_date(&name).filter(|_| is_transcript(&name)) else {
                continue;
            };

            let path = dir.join(&name);
            let contents = match tokio::fs::read(&path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable transcript");
                    continue;
                }
            };
            let transcript = Transcript {
                account: &account,
                target,
                date,
                is_html: name.ends_with(HTML_LOG_FILENAME_SUFFIX),
                is_room: target.is_room(),
            };
            if transcript.parse(&contents).iter().any(|e| contains_text(e, needle)) {
                debug!(path = %path.display(), "Found text");
                hits.push(SearchHit {
                    account: account_name.to_string(),
                    target: target.clone(),
                    date,
                });
            }
        }
        Ok(hits)
    }

    /// Transcript files of one date, in file name order
    async fn page_files(&self, dir: &Path, page: PageKey) -> Result<Vec<PathBuf>, StoreError> {
        let prefix = page.format("%Y-%m-%d").to_string();
        Ok(read_dir_names(dir)
            .await?
            .into_iter()
            .filter(|name| is_transcript(name) && name.starts_with(&prefix))
            .map(|name| dir.join(name))
            .collect())
    }
}

#[async_trait]
impl PageSource for PidginLogStore {
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
        if !mask.intersects(EventMask::TEXT) {
            return Ok(Vec::new());
        }

        let dir = self.target_dir(account, target)?;
        debug!(dir = %dir.display(), "Collating a list of dates");

        let pages: Vec<PageKey> = read_dir_names(&dir)
            .await?
            .iter()
            .filter(|name| is_transcript(name))
            .filter_map(|name| file_date(name))
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
        if !mask.intersects(EventMask::TEXT) {
            return Ok(Vec::new());
        }

        let dir = self.target_dir(account, target)?;
        let mut events = Vec::new();
        for path in self.page_files(&dir, page).await? {
            debug!(path = %path.display(), "Attempting to parse transcript");
            let contents = match tokio::fs::read(&path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::store_read(&path, e)),
            };
            let transcript = Transcript {
                account,
                target,
                date: page,
                is_html: path.to_string_lossy().ends_with(HTML_LOG_FILENAME_SUFFIX),
                is_room: target.is_room(),
            };
            events.extend(transcript.parse(&contents));
        }

        debug!(count = events.len(), "Parsed events");
        Ok(events)
    }

    async fn exists(&self, account: &Account, target: &Entity, mask: EventMask) -> bool {
        if !mask.intersects(EventMask::TEXT) {
            return false;
        }
        let Ok(dir) = self.target_dir(account, target) else {
            return false;
        };
        tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn list_entities(&self, account: &Account) -> Result<Vec<Entity>, StoreError> {
        let dir = self.account_dir(account)?;
        Ok(read_subdir_names(&dir)
            .await?
            .into_iter()
            .filter(|name| name != SYSTEM_DIR)
            .map(|name| match name.strip_suffix(ROOM_DIR_SUFFIX) {
                Some(room) => Entity::room(room),
                None => Entity::contact(name),
            })
            .collect())
    }

    #[instrument(skip_all, fields(store = %self.name, text = %text))]
    async fn search(&self, text: &str, mask: EventMask) -> Result<Vec<SearchHit>, StoreError> {
        if text.is_empty() || !mask.intersects(EventMask::TEXT) {
            return Ok(Vec::new());
        }
        let needle = text.to_lowercase();

        let mut hits = Vec::new();
        for protocol in read_subdir_names(&self.basedir).await? {
            let protocol_dir = self.basedir.join(&protocol);
            for user in read_subdir_names(&protocol_dir).await? {
                let account_name = format!("{}/{}", protocol, user);
                let user_dir = protocol_dir.join(&user);
                for name in read_subdir_names(&user_dir).await? {
                    if name == SYSTEM_DIR {
                        continue;
                    }
                    let target = match name.strip_suffix(ROOM_DIR_SUFFIX) {
                        Some(room) => Entity::room(room),
                        None => Entity::contact(name.as_str()),
                    };
                    let dir = user_dir.join(&name);
                    hits.extend(self.search_dir(&account_name, &target, &dir, &needle).await?);
                }
            }
        }

        debug!(count = hits.len(), "Search finished");
        Ok(sorted_hits(hits))
    }
}

fn is_transcript(name: &str) -> bool {
    name.ends_with(TXT_LOG_FILENAME_SUFFIX) || name.ends_with(HTML_LOG_FILENAME_SUFFIX)
}

/// Date encoded in the `YYYY-MM-DD` prefix of a transcript file name
fn file_date(name: &str) -> Option<NaiveDate> {
    let prefix = name.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Percent-escape a username, keeping unreserved characters, `#`, `@`, and
/// non-ASCII text as they are
fn escape_username(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '#' | '@') || !c.is_ascii()
        {
            escaped.push(c);
        } else {
            escaped.push_str(&format!("%{:02X}", c as u32));
        }
    }
    escaped
}

/// Decode the entities of an HTML message body
///
/// Bodies with an entity the XML rules do not define are kept as written.
fn unescape_body(body: String) -> String {
    match quick_xml::escape::unescape(&body) {
        Ok(text) => text.into_owned(),
        Err(e) => {
            trace!(error = %e, "Keeping message body escaped");
            body
        }
    }
}

/// Parsing context for one transcript file
struct Transcript<'a> {
    account: &'a Account,
    target: &'a Entity,
    date: NaiveDate,
    is_html: bool,
    is_room: bool,
}

impl Transcript<'_> {
    /// Parse every message line; a file without a recognised header yields nothing
    fn parse(&self, contents: &str) -> Vec<Event> {
        let mut lines = contents.lines();
        let header_re = if self.is_html { &*HTML_HEADER } else { &*TXT_HEADER };

        let Some(header) = lines.next().and_then(|first| header_re.captures(first)) else {
            debug!("Transcript has no conversation header");
            return Vec::new();
        };
        let target_id = header[1].to_string();
        let own_user = header[3].to_string();

        let mut events = Vec::new();
        for line in lines {
            if self.is_html && line == "</body></html>" {
                break;
            }
            if let Some(event) = self.parse_line(line, &target_id, &own_user) {
                events.push(event);
            }
        }
        events
    }

    fn parse_line(&self, line: &str, target_id: &str, own_user: &str) -> Option<Event> {
        let (time, sender_name, body, is_user) = if self.is_html {
            let caps = HTML_LINE.captures(line)?;
            let body = caps.get(4).map_or("", |m| m.as_str()).replace("<br/>", "\n");
            (caps[1].to_string(), caps[2].to_string(), unescape_body(body), line.contains(SELF_COLOUR))
        } else {
            let caps = TXT_LINE.captures(line)?;
            (caps[1].to_string(), caps[2].to_string(), caps[3].to_string(), false)
        };

        let time = NaiveTime::parse_from_str(&time, "%H:%M:%S").ok()?;
        let timestamp = self.date.and_time(time).and_utc().timestamp();

        let sender = if is_user {
            Entity::new(own_user, EntityType::SelfContact, Some(sender_name), None)
        } else {
            Entity::new(sender_name.clone(), EntityType::Contact, Some(sender_name), None)
        };

        // Plain text transcripts outside rooms do not say who the receiver was
        let receiver = if self.is_room {
            Some(Entity::new(target_id, EntityType::Room, None, None))
        } else if !self.is_html {
            None
        } else if is_user {
            Some(Entity::new(target_id, EntityType::Contact, None, None))
        } else {
            Some(Entity::new(own_user, EntityType::SelfContact, None, None))
        };

        Some(
            TextEvent {
                timestamp,
                account: self.account.id().to_string(),
                target: self.target.clone(),
                sender,
                receiver,
                message: body,
                message_type: MessageType::Normal,
                log_id: None,
            }
            .into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn account() -> Account {
        Account::new("haze/jabber/user_40collabora_2eco_2euk0")
            .unwrap()
            .with_protocol("jabber")
            .with_parameter("account", "user@collabora.co.uk")
    }

    fn write(base: &Path, rel: &str, contents: &str) {
        let path = base.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    const TXT_LOG: &str = "Conversation with user2@collabora.co.uk at Wed 13 Jan 2010 05:48:01 PM GMT on user@collabora.co.uk/Telepathy (jabber)\n\
(17:48:01) User2: hello\n\
(17:48:05) Me: hi there\n\
garbage line\n";

    const HTML_LOG: &str = "<html><head><meta http-equiv=\"content-type\" content=\"text/html; charset=UTF-8\"><title>Conversation</title></head><body><h3>Conversation with user2@collabora.co.uk at Wed 13 Jan 2010 06:00:00 PM GMT on user@collabora.co.uk (jabber)</h3>\n\
<font color=\"#A82F2F\"><font size=\"2\">(18:00:00)</font> <b>User2:</b></font> first<br/>line<br/>\n\
<font color=\"#16569E\"><font size=\"2\">(18:00:09)</font> <b>Me:</b></font> reply<br/>\n\
</body></html>\n";

    #[test]
    fn test_escape_username() {
        assert_eq!(escape_username("user@collabora.co.uk"), "user@collabora.co.uk");
        assert_eq!(escape_username("a b/c#d"), "a%20b%2Fc#d");
        assert_eq!(escape_username("café"), "café");
    }

    #[test]
    fn test_account_dir() {
        let store = PidginLogStore::new("/purple");
        assert_eq!(
            store.account_dir(&account()).unwrap(),
            PathBuf::from("/purple/jabber/user@collabora.co.uk")
        );

        let irc = Account::new("idle/irc/me")
            .unwrap()
            .with_protocol("irc")
            .with_parameter("account", "me")
            .with_parameter("server", "irc.freenode.net");
        assert_eq!(
            store.account_dir(&irc).unwrap(),
            PathBuf::from("/purple/irc/me@irc.freenode.net")
        );

        let bare = Account::new("gabble/jabber/me").unwrap();
        assert!(matches!(
            store.account_dir(&bare),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_target_dir() {
        let store = PidginLogStore::new("/purple");
        let account = account();
        assert!(
            store
                .target_dir(&account, &Entity::room("meeting@conference.collabora.co.uk"))
                .unwrap()
                .ends_with("meeting@conference.collabora.co.uk.chat")
        );
        assert!(
            store
                .target_dir(&account, &Entity::contact("user2@collabora.co.uk#1"))
                .unwrap()
                .ends_with("user@collabora.co.uk/user2@collabora.co.uk")
        );
    }

    #[tokio::test]
    async fn test_list_pages_dedups_dates() {
        let temp = TempDir::new().unwrap();
        let dir = "jabber/user@collabora.co.uk/user2@collabora.co.uk";
        write(temp.path(), &format!("{dir}/2010-01-13.174801+0000GMT.txt"), TXT_LOG);
        write(temp.path(), &format!("{dir}/2010-01-13.180000+0000GMT.html"), HTML_LOG);
        write(temp.path(), &format!("{dir}/2009-12-01.100000+0000GMT.txt"), TXT_LOG);
        write(temp.path(), &format!("{dir}/notes.md"), "");

        let store = PidginLogStore::new(temp.path());
        let target = Entity::contact("user2@collabora.co.uk");
        let pages = store
            .list_pages(&account(), &target, EventMask::ANY)
            .await
            .unwrap();
        assert_eq!(
            pages,
            vec![
                NaiveDate::from_ymd_opt(2009, 12, 1).unwrap(),
                NaiveDate::from_ymd_opt(2010, 1, 13).unwrap(),
            ]
        );

        let none = store
            .list_pages(&account(), &target, EventMask::CALL)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_load_page_joins_files() {
        let temp = TempDir::new().unwrap();
        let dir = "jabber/user@collabora.co.uk/user2@collabora.co.uk";
        write(temp.path(), &format!("{dir}/2010-01-13.174801+0000GMT.txt"), TXT_LOG);
        write(temp.path(), &format!("{dir}/2010-01-13.180000+0000GMT.html"), HTML_LOG);

        let store = PidginLogStore::new(temp.path());
        let events = store
            .load_page(
                &account(),
                &Entity::contact("user2@collabora.co.uk"),
                EventMask::ANY,
                NaiveDate::from_ymd_opt(2010, 1, 13).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(events.len(), 4);

        let first = events[0].as_text().unwrap();
        assert_eq!(first.timestamp, 1263404881);
        assert_eq!(first.message, "hello");
        assert_eq!(first.sender.alias(), "User2");
        assert!(first.receiver.is_none());

        let html = events[2].as_text().unwrap();
        assert_eq!(html.message, "first\nline");
        assert_eq!(html.sender.entity_type(), EntityType::Contact);
        assert_eq!(
            html.receiver.as_ref().map(|r| r.entity_type()),
            Some(EntityType::SelfContact)
        );

        let mine = events[3].as_text().unwrap();
        assert_eq!(mine.message, "reply");
        assert_eq!(mine.sender.entity_type(), EntityType::SelfContact);
        assert_eq!(mine.sender.identifier(), "user@collabora.co.uk");
    }

    #[test]
    fn test_html_body_entities_are_decoded() {
        let account = account();
        let target = Entity::contact("user2@collabora.co.uk");
        let transcript = Transcript {
            account: &account,
            target: &target,
            date: NaiveDate::from_ymd_opt(2010, 1, 13).unwrap(),
            is_html: true,
            is_room: false,
        };
        let log = "<html><body><h3>Conversation with user2@collabora.co.uk at Wed 13 Jan 2010 06:00:00 PM GMT on user@collabora.co.uk (jabber)</h3>\n\
<font color=\"#A82F2F\"><font size=\"2\">(18:00:00)</font> <b>User2:</b></font> it&apos;s a &amp; b<br/>\n\
<font color=\"#A82F2F\"><font size=\"2\">(18:00:01)</font> <b>User2:</b></font> &lt;3<br/>&quot;q&quot;<br/>\n\
<font color=\"#A82F2F\"><font size=\"2\">(18:00:02)</font> <b>User2:</b></font> odd &bogus; entity<br/>\n\
</body></html>\n";

        let messages: Vec<String> = transcript
            .parse(log)
            .iter()
            .map(|e| e.as_text().unwrap().message.clone())
            .collect();
        assert_eq!(messages, ["it's a & b", "<3\n\"q\"", "odd &bogus; entity"]);
    }

    #[test]
    fn test_txt_body_is_kept_verbatim() {
        let account = account();
        let target = Entity::contact("user2@collabora.co.uk");
        let transcript = Transcript {
            account: &account,
            target: &target,
            date: NaiveDate::from_ymd_opt(2010, 1, 13).unwrap(),
            is_html: false,
            is_room: false,
        };
        let log = "Conversation with user2@collabora.co.uk at Wed 13 Jan 2010 05:48:01 PM GMT on user@collabora.co.uk (jabber)\n\
(17:48:01) User2: a &amp; b\n";

        let events = transcript.parse(log);
        assert_eq!(events[0].as_text().unwrap().message, "a &amp; b");
    }

    #[tokio::test]
    async fn test_search_transcripts() {
        let temp = TempDir::new().unwrap();
        let dir = "jabber/user@collabora.co.uk/user2@collabora.co.uk";
        write(temp.path(), &format!("{dir}/2010-01-13.174801+0000GMT.txt"), TXT_LOG);
        write(temp.path(), &format!("{dir}/2010-01-13.180000+0000GMT.html"), HTML_LOG);
        write(temp.path(), &format!("{dir}/2010-01-20.100000+0000GMT.txt"), TXT_LOG);
        write(temp.path(), "jabber/user@collabora.co.uk/.system/2010-01-13.000000+0000GMT.txt", TXT_LOG);

        let store = PidginLogStore::new(temp.path());
        let hits = store.search("Hi There", EventMask::ANY).await.unwrap();
        let hit = |day| SearchHit {
            account: "jabber/user@collabora.co.uk".to_string(),
            target: Entity::contact("user2@collabora.co.uk"),
            date: NaiveDate::from_ymd_opt(2010, 1, day).unwrap(),
        };
        assert_eq!(hits, vec![hit(13), hit(20)]);

        // Only the HTML transcript of the 13th has this line, split by <br/>
        let html = store.search("first\nline", EventMask::TEXT).await.unwrap();
        assert_eq!(html, vec![hit(13)]);

        assert!(store.search("hello", EventMask::CALL).await.unwrap().is_empty());
        assert!(store.search("Conversation with", EventMask::ANY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_entities() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("jabber/user@collabora.co.uk/user2@collabora.co.uk")).unwrap();
        std::fs::create_dir_all(temp.path().join("jabber/user@collabora.co.uk/meeting@conference.collabora.co.uk.chat")).unwrap();
        std::fs::create_dir_all(temp.path().join("jabber/user@collabora.co.uk/.system")).unwrap();

        let store = PidginLogStore::new(temp.path());
        let entities = store.list_entities(&account()).await.unwrap();
        assert_eq!(
            entities,
            vec![
                Entity::room("meeting@conference.collabora.co.uk"),
                Entity::contact("user2@collabora.co.uk"),
            ]
        );
    }
}
